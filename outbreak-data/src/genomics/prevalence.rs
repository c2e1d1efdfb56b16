//! Prevalence queries
//!
//! Global and per-location prevalence of a lineage/mutation selection, in
//! cumulative, most-recent and daily (temporal) forms, plus the all-lineage
//! breakdowns used by location reports.

use super::{GenomicsApi, GenomicsQuery, Location, LocationType};
use crate::aggregate::join_ordered;
use crate::client::QueryParams;
use crate::error::{QueryError, QueryResult};
use crate::normalize::{
    capitalize, cumulative_label, de_date, de_lenient_f64, format_count, format_date_long,
    format_percent, is_new_today, parse_build_date, parse_date, relative_age, short_date_label,
    strip_whitespace, title_case,
};
use chrono::NaiveDate;
use outbreak_common::time::{self, CacheBucket};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Cumulative prevalence of a selection in one place (or worldwide)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativePrevalence {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub location_type: Option<LocationType>,
    #[serde(default)]
    pub global_prevalence: f64,
    #[serde(default)]
    pub total_sequences: Option<u64>,
    #[serde(default)]
    pub lineage_count: u64,
    #[serde(default)]
    pub first_detected: Option<String>,
    #[serde(default)]
    pub last_detected: Option<String>,
    #[serde(default)]
    pub proportion_formatted: String,
    #[serde(default)]
    pub lineage_count_formatted: String,
}

impl CumulativePrevalence {
    fn format_common(&mut self) {
        self.first_detected = short_date_label(self.first_detected.as_deref());
        self.last_detected = short_date_label(self.last_detected.as_deref());
        self.lineage_count_formatted = format_count(self.lineage_count as i64);
    }
}

/// Sequences submitted today (or recently) for one location
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewToday {
    pub name: String,
    /// Raw count: `Some(0)` when the latest submission is older, `None` when unknown
    pub count: Option<u64>,
    pub date_count_today: Option<String>,
}

impl NewToday {
    fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: None,
            date_count_today: None,
        }
    }
}

/// Most recent prevalence of a selection in one sub-location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPrevalence {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location_id: String,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub lineage_count: Option<u64>,
    #[serde(default)]
    pub proportion: f64,
    #[serde(default)]
    pub proportion_formatted: String,
    #[serde(default, alias = "date")]
    pub date_last_detected: Option<String>,
}

/// One day of a prevalence time series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrevalencePoint {
    #[serde(default, deserialize_with = "de_date")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub lineage_count: Option<u64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub proportion: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Latest collection date of a lineage or mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MostRecentSequence {
    pub date: String,
    pub date_formatted: Option<String>,
}

/// Backend build time, long-formatted and as a relative age
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateUpdated {
    pub date_updated: Option<String>,
    pub last_updated: Option<String>,
}

/// Rolling prevalence of every lineage on one date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageDay {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub prevalence: BTreeMap<String, f64>,
}

/// Daily all-lineage breakdown for one place
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineagesByDay {
    /// Lineages in order of first appearance
    pub lineages: Vec<String>,
    pub days: Vec<LineageDay>,
}

/// Cumulative share of one lineage in a place
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineageShare {
    pub lineage: String,
    pub prevalence: f64,
}

#[derive(Debug, Deserialize)]
struct SubmissionDate {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SequenceTotal {
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AllLineagesRow {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    lineage: String,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    prevalence: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    prevalence_rolling: Option<f64>,
}

/// Daily breakdowns start after this date
fn all_lineages_start() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2020, 3, 14)
}

/// Pivot long `(date, lineage, prevalence_rolling)` rows into one row per date
///
/// A lineage missing on a date (or present more than once) gets 0.
pub(crate) fn widen_lineage_rows(rows: Vec<AllLineagesRow>) -> LineagesByDay {
    let mut lineages: Vec<String> = Vec::new();
    let mut by_date: BTreeMap<String, Vec<(String, Option<f64>)>> = BTreeMap::new();

    for row in rows {
        let lineage = capitalize(&row.lineage);
        if !lineages.contains(&lineage) {
            lineages.push(lineage.clone());
        }
        by_date
            .entry(row.date.unwrap_or_default())
            .or_default()
            .push((lineage, row.prevalence_rolling));
    }

    let start = all_lineages_start();
    let days = by_date
        .into_iter()
        .filter_map(|(key, values)| {
            let date = parse_date(&key)?;
            if start.is_some_and(|start| date <= start) {
                return None;
            }
            let prevalence = lineages
                .iter()
                .map(|lineage| {
                    let matches: Vec<_> = values.iter().filter(|(l, _)| l == lineage).collect();
                    let value = match matches.as_slice() {
                        [(_, value)] => value.unwrap_or(0.0),
                        _ => 0.0,
                    };
                    (lineage.clone(), value)
                })
                .collect();
            Some(LineageDay { date, prevalence })
        })
        .collect();

    LineagesByDay { lineages, days }
}

impl GenomicsApi {
    /// Cumulative worldwide prevalence of a selection
    pub async fn world_prevalence(&self, query: &GenomicsQuery) -> QueryResult<CumulativePrevalence> {
        let params = QueryParams::new()
            .param("cumulative", "true")
            .extend(&query.params())
            .timestamp(CacheBucket::Hourly);
        let mut result: CumulativePrevalence = self
            .client
            .query_as("global-prevalence", &params, "/results")
            .await?;
        result.proportion_formatted = format_percent(result.global_prevalence);
        result.format_common();
        Ok(result)
    }

    /// Cumulative prevalence of a selection in one location
    pub async fn cumulative_prevalence(
        &self,
        query: &GenomicsQuery,
        location: &Location,
    ) -> QueryResult<CumulativePrevalence> {
        let params = query
            .params()
            .extend(&location.params())
            .param("cumulative", "true")
            .timestamp(CacheBucket::Hourly);
        let mut result: CumulativePrevalence = self
            .client
            .query_as("prevalence-by-location", &params, "/results")
            .await?;
        result.name = Some(location.name.clone());
        result.location_type = Some(location.kind);
        result.proportion_formatted = cumulative_label(result.global_prevalence, result.lineage_count);
        result.format_common();
        Ok(result)
    }

    /// Cumulative prevalence in every non-world location, highest first
    ///
    /// Failed locations are logged and left out.
    pub async fn cumulative_prevalences(
        &self,
        query: &GenomicsQuery,
        locations: &[Location],
    ) -> Vec<CumulativePrevalence> {
        let tasks = locations
            .iter()
            .filter(|l| !l.is_world())
            .map(|location| async move {
                self.cumulative_prevalence(query, location)
                    .await
                    .map_err(|e| {
                        warn!(location = %location, error = %e, "Cumulative prevalence failed");
                        e
                    })
                    .ok()
            });
        let mut results: Vec<CumulativePrevalence> =
            join_ordered(tasks).await.into_iter().flatten().collect();
        results.sort_by(|a, b| b.global_prevalence.total_cmp(&a.global_prevalence));
        results
    }

    /// Sequences submitted in the last day for one location
    ///
    /// Exactly one submission-date result is expected; anything else is reported
    /// as unknown rather than an error.
    pub async fn new_today(&self, query: &GenomicsQuery, location: &Location) -> QueryResult<NewToday> {
        let params = query
            .params()
            .extend(&location.params())
            .timestamp(CacheBucket::Hourly);
        let results: Vec<SubmissionDate> = self
            .client
            .query_as("most-recent-submission-date", &params, "/results")
            .await?;

        let single = match results.as_slice() {
            [single] => single,
            _ => return Ok(NewToday::unknown(&location.name)),
        };
        let date = match single.date.as_deref().and_then(parse_date) {
            Some(date) => date,
            None => return Ok(NewToday::unknown(&location.name)),
        };

        let count = if is_new_today(date, time::today()) {
            single.date_count.unwrap_or(0)
        } else {
            0
        };
        Ok(NewToday {
            name: location.name.clone(),
            count: Some(count),
            date_count_today: Some(format_count(count as i64)),
        })
    }

    /// New-today counts for Worldwide plus every non-world location, highest first
    pub async fn new_today_all(&self, query: &GenomicsQuery, locations: &[Location]) -> Vec<NewToday> {
        let world = Location::worldwide();
        let targets: Vec<&Location> = std::iter::once(&world)
            .chain(locations.iter().filter(|l| !l.is_world()))
            .collect();
        let tasks = targets.into_iter().map(|location| async move {
            match self.new_today(query, location).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(location = %location, error = %e, "New-today lookup failed");
                    NewToday::unknown(&location.name)
                }
            }
        });
        let mut results = join_ordered(tasks).await;
        // None sorts below Some, so unknown counts land last
        results.sort_by(|a, b| b.count.cmp(&a.count));
        results
    }

    /// Most recent prevalence in each sub-location
    ///
    /// Worldwide lists countries; a country lists its divisions; divisions have
    /// no sub-locations and yield an empty list.
    pub async fn location_prevalence(
        &self,
        query: &GenomicsQuery,
        location: &Location,
        ndays: Option<u32>,
    ) -> QueryResult<Vec<LocationPrevalence>> {
        if location.kind == LocationType::Division {
            return Ok(Vec::new());
        }
        let world = location.is_world();
        let (path, base) = if world {
            ("lineage-by-country-most-recent", QueryParams::new())
        } else {
            (
                "lineage-by-division-most-recent",
                QueryParams::new().param("country", &location.name),
            )
        };
        let params = base
            .extend(&query.params())
            .timestamp(CacheBucket::Hourly)
            .param_opt("ndays", ndays);

        let results: Vec<LocationPrevalence> = self.client.query_as(path, &params, "/results").await?;
        Ok(results
            .into_iter()
            .map(|mut d| {
                d.name = title_case(&d.name);
                d.proportion_formatted = format_percent(d.proportion);
                // Prefixed for countries so Georgia the country and Georgia the state differ
                d.location_id = if world {
                    format!("country_{}", strip_whitespace(&d.name))
                } else {
                    strip_whitespace(&d.name)
                };
                d
            })
            .collect())
    }

    /// Names of sub-locations where the selection has been detected
    pub async fn positive_locations(&self, query: &GenomicsQuery, location: &Location) -> QueryResult<Vec<String>> {
        let (path, base) = if location.is_world() {
            ("lineage-by-country-most-recent", QueryParams::new())
        } else {
            (
                "lineage-by-division-most-recent",
                QueryParams::new().param("country", &location.name),
            )
        };
        let params = base
            .extend(&query.params())
            .param("detected", "true")
            .timestamp(CacheBucket::Hourly);
        let names: Vec<String> = self.client.query_as(path, &params, "/results/names").await?;
        Ok(names.iter().map(|n| title_case(n)).collect())
    }

    /// Daily prevalence of a selection in one location
    pub async fn temporal_prevalence(
        &self,
        location: &Location,
        query: &GenomicsQuery,
    ) -> QueryResult<Vec<PrevalencePoint>> {
        let path = if location.is_world() {
            "global-prevalence"
        } else {
            "prevalence-by-location"
        };
        let params = query
            .params()
            .extend(&location.params())
            .timestamp(CacheBucket::Hourly);
        let results: Vec<PrevalencePoint> = self.client.query_as(path, &params, "/results").await?;
        Ok(results
            .into_iter()
            .map(|mut d| {
                d.name = d.name.as_deref().map(title_case);
                d
            })
            .collect())
    }

    /// Latest collection date for `<query_var>=<value>`; `None` unless exactly one result
    pub async fn most_recent_sequence(&self, query_var: &str, value: &str) -> QueryResult<Option<MostRecentSequence>> {
        let params = QueryParams::new()
            .param(query_var, value)
            .timestamp(CacheBucket::Hourly);
        let results: Vec<SubmissionDate> = self
            .client
            .query_as("most-recent-collection-date", &params, "/results")
            .await?;
        Ok(match results.as_slice() {
            [SubmissionDate { date: Some(date), .. }] => Some(MostRecentSequence {
                date: date.clone(),
                date_formatted: parse_date(date).map(format_date_long),
            }),
            _ => None,
        })
    }

    /// Backend build date
    pub async fn date_updated(&self) -> QueryResult<DateUpdated> {
        let params = QueryParams::new().timestamp(CacheBucket::Daily);
        let raw: Option<String> = self.client.query_as("metadata", &params, "/build_date").await?;
        let built = raw.as_deref().and_then(parse_build_date);
        if built.is_none() {
            debug!(build_date = ?raw, "Unparseable build date");
        }
        Ok(DateUpdated {
            date_updated: built.map(|dt| format_date_long(dt.date_naive())),
            last_updated: built.map(|dt| relative_age(dt, time::now())),
        })
    }

    /// Total sequences, worldwide when `location` is `None`
    pub async fn sequence_count(&self, location: Option<&Location>) -> QueryResult<u64> {
        let params = location
            .map(Location::params)
            .unwrap_or_default()
            .timestamp(CacheBucket::Hourly);
        let results: Vec<SequenceTotal> = self
            .client
            .query_as("sequence-count", &params, "/results")
            .await?;
        results
            .first()
            .map(|r| r.total_count)
            .ok_or_else(|| QueryError::Shape("sequence-count returned no results".to_string()))
    }

    fn all_lineages_params(
        location: &Location,
        other_threshold: f64,
        nday_threshold: u32,
        ndays: u32,
    ) -> (&'static str, QueryParams) {
        let (path, key) = match location.kind {
            LocationType::Division => ("prevalence-by-division-all-lineages", "division"),
            _ => ("prevalence-by-country-all-lineages", "country"),
        };
        let params = QueryParams::new()
            .param(key, &location.name)
            .param("other_threshold", other_threshold)
            .param("nday_threshold", nday_threshold)
            .param("ndays", ndays);
        (path, params)
    }

    /// Daily rolling prevalence of every lineage in one place
    pub async fn prevalence_all_lineages(
        &self,
        location: &Location,
        other_threshold: f64,
        nday_threshold: u32,
        ndays: u32,
    ) -> QueryResult<LineagesByDay> {
        let (path, params) = Self::all_lineages_params(location, other_threshold, nday_threshold, ndays);
        let params = params.timestamp(CacheBucket::Daily);
        let rows: Vec<AllLineagesRow> = self.client.query_as(path, &params, "/results").await?;
        Ok(widen_lineage_rows(rows))
    }

    /// Cumulative share of every lineage in one place, largest first
    pub async fn cumulative_prevalence_all_lineages(
        &self,
        location: &Location,
        other_threshold: f64,
        nday_threshold: u32,
        ndays: u32,
    ) -> QueryResult<Vec<LineageShare>> {
        let (path, params) = Self::all_lineages_params(location, other_threshold, nday_threshold, ndays);
        let params = params
            .param("cumulative", "true")
            .timestamp(CacheBucket::Daily);
        let rows: Vec<AllLineagesRow> = self.client.query_as(path, &params, "/results").await?;

        // Repeated lineages keep the last value
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut shares: Vec<LineageShare> = Vec::new();
        for row in rows {
            let lineage = capitalize(&row.lineage);
            let prevalence = row.prevalence.unwrap_or(0.0);
            match seen.get(&lineage) {
                Some(&i) => shares[i].prevalence = prevalence,
                None => {
                    seen.insert(lineage.clone(), shares.len());
                    shares.push(LineageShare { lineage, prevalence });
                }
            }
        }
        shares.sort_by(|a, b| b.prevalence.total_cmp(&a.prevalence));
        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<AllLineagesRow> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_widen_lineage_rows() {
        let wide = widen_lineage_rows(rows(json!([
            {"date": "2020-03-14", "lineage": "b.1", "prevalence_rolling": 0.9},
            {"date": "2021-01-02", "lineage": "b.1.1.7", "prevalence_rolling": 0.4},
            {"date": "2021-01-01", "lineage": "b.1", "prevalence_rolling": 0.7},
            {"date": "2021-01-02", "lineage": "other", "prevalence_rolling": 0.6},
            {"date": "2021-01-01", "lineage": "b.1.1.7", "prevalence_rolling": 0.3}
        ])));

        assert_eq!(wide.lineages, vec!["B.1", "B.1.1.7", "Other"]);
        // 2020-03-14 is on the cutoff and excluded
        assert_eq!(wide.days.len(), 2);
        assert_eq!(wide.days[0].date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(wide.days[0].prevalence["B.1"], 0.7);
        assert_eq!(wide.days[0].prevalence["Other"], 0.0);
        assert_eq!(wide.days[1].prevalence["B.1"], 0.0);
        assert_eq!(wide.days[1].prevalence["Other"], 0.6);
    }

    #[test]
    fn test_widen_drops_unparseable_dates() {
        let wide = widen_lineage_rows(rows(json!([
            {"date": "not a date", "lineage": "b.1", "prevalence_rolling": 0.9},
            {"lineage": "b.1", "prevalence_rolling": 0.9}
        ])));
        assert_eq!(wide.lineages, vec!["B.1"]);
        assert!(wide.days.is_empty());
    }

    #[test]
    fn test_location_prevalence_date_alias() {
        let d: LocationPrevalence = serde_json::from_value(json!({
            "name": "united kingdom",
            "proportion": 0.5,
            "date": "2021-02-01"
        }))
        .unwrap();
        assert_eq!(d.date_last_detected.as_deref(), Some("2021-02-01"));
        let out = serde_json::to_value(&d).unwrap();
        assert!(out.get("date").is_none());
        assert_eq!(out["date_last_detected"], "2021-02-01");
    }
}
