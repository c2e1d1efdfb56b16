//! Similar-location search
//!
//! Given a focal location and a metric, finds the locations whose most recent
//! value of that metric lies close to the focal value, then returns their full
//! time series grouped by location.
//!
//! # Pipeline
//! 1. Fetch the focal location's most recent record
//! 2. Build a tolerance band around its metric value
//! 3. Query every location whose latest value falls inside the band
//! 4. Rank by absolute difference and keep an inclusive top-K
//! 5. Fetch the full series of the kept peers plus the focal location
//! 6. Group by location, recompute differences, sort and partition

use crate::client::{QueryClient, QueryParams};
use crate::error::{QueryError, QueryResult};
use crate::normalize::{de_date, de_lenient_f64, display_name, value_as_f64};
use crate::query::{admin_level_filter, AdminLevel, Query};
use crate::status::{Fetched, GenerationTracker, DATA_LOADING};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Relative band half-width
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Peers returned before ties are added
pub const DEFAULT_NUM_TO_RETURN: usize = 5;

/// Metric compared when the caller does not pick one
pub const SIMILARITY_METRIC: &str = "confirmed_rolling_per_100k";

const USA_COUNTRY_NAME: &str = "United States of America";

/// Fields every series request asks for besides the metric
const SERIES_FIELDS: [&str; 10] = [
    "name",
    "lat",
    "long",
    "date",
    "location_id",
    "confirmed_rolling_per_100k",
    "dead_rolling_per_100k",
    "state_name",
    "country_name",
    "population",
];

/// One location on one date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpiRecord {
    #[serde(default, deserialize_with = "de_date")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub location_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, rename = "long", deserialize_with = "de_lenient_f64")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub population: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub confirmed_rolling_per_100k: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub dead_rolling_per_100k: Option<f64>,
    /// Any other requested metric
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EpiRecord {
    /// Numeric value of a named metric
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "confirmed_rolling_per_100k" => self.confirmed_rolling_per_100k,
            "dead_rolling_per_100k" => self.dead_rolling_per_100k,
            "population" => self.population,
            "lat" => self.lat,
            "long" => self.lon,
            _ => self.extra.get(name).and_then(value_as_f64),
        }
    }
}

/// Sort a series ascending by date; undated records first, otherwise stable
pub fn sort_series(series: &mut [EpiRecord]) {
    series.sort_by_key(|record| record.date);
}

/// How the band is spread around the focal value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandMode {
    Logarithmic,
    Linear,
}

/// Closed interval of metric values considered similar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityBand {
    pub lo: f64,
    pub hi: f64,
}

impl SimilarityBand {
    /// Band around `value` with relative tolerance `tolerance`
    ///
    /// Logarithmic mode spreads the exponent, so `[v^(1-t), v^(1+t)]`. It is
    /// undefined for `v <= 0`, where the linear band is used instead. For
    /// `0 < v < 1` the logarithmic endpoints come out swapped; they are
    /// reordered and widened if needed so the band always contains `v`.
    pub fn new(value: f64, tolerance: f64, mode: BandMode) -> Self {
        let mode = if value <= 0.0 { BandMode::Linear } else { mode };
        let (a, b) = match mode {
            BandMode::Logarithmic => {
                let exponent = value.log10();
                (
                    10f64.powf((1.0 - tolerance) * exponent),
                    10f64.powf((1.0 + tolerance) * exponent),
                )
            }
            BandMode::Linear => ((1.0 - tolerance) * value, (1.0 + tolerance) * value),
        };
        Self {
            lo: a.min(b).min(value),
            hi: a.max(b).max(value),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// `metric:[lo TO hi]`
    pub fn to_query(&self, metric: &str) -> Query {
        Query::range(metric, self.lo, self.hi)
    }
}

/// A candidate location with its distance from the focal value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPeer {
    pub location_id: String,
    pub value: f64,
    pub value_diff: f64,
}

/// Annotate and sort candidates by `|value - focal|`
///
/// Records without a value for the metric are dropped. The sort is stable, so
/// equal differences keep their response order.
pub fn rank_peers(records: &[EpiRecord], metric: &str, focal_value: f64) -> Vec<RankedPeer> {
    let mut ranked: Vec<RankedPeer> = records
        .iter()
        .filter_map(|record| {
            let value = record.metric(metric)?;
            Some(RankedPeer {
                location_id: record.location_id.clone(),
                value,
                value_diff: (value - focal_value).abs(),
            })
        })
        .collect();
    ranked.sort_by(|a, b| a.value_diff.total_cmp(&b.value_diff));
    ranked
}

/// Keep every ranked peer whose difference is within that of position `k`
///
/// The boundary is taken at index `min(k, len - 1)`, so ties at the boundary
/// all survive and the result may hold more than `k` peers.
pub fn inclusive_top_k(ranked: Vec<RankedPeer>, k: usize) -> Vec<RankedPeer> {
    let boundary = match ranked.get(k.min(ranked.len().saturating_sub(1))) {
        Some(peer) => peer.value_diff,
        None => return Vec::new(),
    };
    ranked
        .into_iter()
        .filter(|peer| peer.value_diff <= boundary)
        .collect()
}

/// One location's series plus display fields from its latest record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationGroup {
    pub key: String,
    pub values: Vec<EpiRecord>,
    pub name: String,
    pub name_formatted: String,
    pub part_of_usa: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub similar_value: Option<f64>,
    pub value_diff: Option<f64>,
}

impl LocationGroup {
    fn from_series(key: String, values: Vec<EpiRecord>, metric: &str) -> Self {
        let latest = values.last().cloned().unwrap_or_default();
        Self {
            key,
            name_formatted: display_name(
                &latest.name,
                latest.state_name.as_deref(),
                latest.country_name.as_deref(),
            ),
            part_of_usa: latest.country_name.as_deref() == Some(USA_COUNTRY_NAME),
            lat: latest.lat,
            lon: latest.lon,
            similar_value: latest.metric(metric),
            name: latest.name,
            value_diff: None,
            values,
        }
    }
}

/// Result of a similarity search
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimilarityReport {
    /// The focal location's group
    pub location: Option<LocationGroup>,
    /// Peer groups, closest first
    pub similar: Vec<LocationGroup>,
    /// Earliest and latest date across every series
    pub x_domain: Option<(NaiveDate, NaiveDate)>,
    pub y_max_confirmed: Option<f64>,
    pub y_max_dead: Option<f64>,
}

/// Group records by location in first-appearance order
pub fn group_by_location(records: Vec<EpiRecord>, metric: &str) -> Vec<LocationGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<EpiRecord>> = HashMap::new();
    for record in records {
        let key = record.location_id.clone();
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(record);
    }
    order
        .into_iter()
        .filter_map(|key| {
            let values = buckets.remove(&key)?;
            Some(LocationGroup::from_series(key, values, metric))
        })
        .collect()
}

fn max_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

/// Build the report from the fetched peer series
///
/// Differences are recomputed against `focal_value`, the value the band was
/// built from; a focal group whose latest value disagrees is logged.
pub fn assemble_report(
    mut records: Vec<EpiRecord>,
    focal_id: &str,
    focal_value: f64,
    metric: &str,
) -> SimilarityReport {
    sort_series(&mut records);

    let dates = records.iter().filter_map(|r| r.date);
    let x_domain = dates.clone().min().zip(dates.max());
    let y_max_confirmed = max_of(records.iter().map(|r| r.confirmed_rolling_per_100k));
    let y_max_dead = max_of(records.iter().map(|r| r.dead_rolling_per_100k));

    let mut groups = group_by_location(records, metric);
    for group in &mut groups {
        group.value_diff = group.similar_value.map(|v| (v - focal_value).abs());
        if group.key == focal_id {
            if let Some(latest) = group.similar_value {
                if (latest - focal_value).abs() > f64::EPSILON * focal_value.abs().max(1.0) {
                    warn!(
                        location_id = %focal_id,
                        focal_value,
                        latest,
                        "Focal series disagrees with the value used for the band"
                    );
                }
            }
        }
    }
    groups.sort_by(|a, b| {
        a.value_diff
            .unwrap_or(f64::INFINITY)
            .total_cmp(&b.value_diff.unwrap_or(f64::INFINITY))
    });

    let (focal, similar): (Vec<LocationGroup>, Vec<LocationGroup>) =
        groups.into_iter().partition(|g| g.key == focal_id);
    if focal.is_empty() {
        warn!(location_id = %focal_id, "Focal location missing from peer series");
    }

    SimilarityReport {
        location: focal.into_iter().next(),
        similar,
        x_domain,
        y_max_confirmed,
        y_max_dead,
    }
}

/// Epidemiology API: series lookups and similarity search
#[derive(Clone)]
pub struct EpiApi {
    client: QueryClient,
    tracker: GenerationTracker,
}

impl EpiApi {
    pub fn new(client: QueryClient, tracker: GenerationTracker) -> Self {
        Self { client, tracker }
    }

    fn series_fields<'a>(variable: &'a str, metric: &'a str) -> Vec<&'a str> {
        let mut fields = vec![metric];
        if !variable.is_empty() && variable != metric {
            fields.push(variable);
        }
        for field in SERIES_FIELDS {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    async fn fetch_series(&self, location: Query, variable: &str, metric: &str) -> QueryResult<Vec<EpiRecord>> {
        let params = QueryParams::new()
            .q(&location)
            .fields(&Self::series_fields(variable, metric));
        let hits = self.client.query_all(&params).await?;
        let mut series = hits
            .into_iter()
            .map(serde_json::from_value::<EpiRecord>)
            .collect::<Result<Vec<_>, _>>()?;
        sort_series(&mut series);
        Ok(series)
    }

    /// Full date-ordered series for one location
    pub async fn location_series(&self, location_id: &str, variable: &str, metric: &str) -> QueryResult<Vec<EpiRecord>> {
        self.fetch_series(Query::term("location_id", location_id), variable, metric)
            .await
    }

    /// Latest record for one location
    pub async fn latest_record(&self, location_id: &str, variable: &str, metric: &str) -> QueryResult<EpiRecord> {
        let query = Query::and(vec![
            Query::term("location_id", location_id),
            Query::term("mostRecent", "true"),
        ]);
        self.fetch_series(query, variable, metric)
            .await?
            .pop()
            .ok_or_else(|| QueryError::Shape(format!("no records for location {}", location_id)))
    }

    /// Series for several locations in one OR query
    pub async fn series_for(&self, location_ids: &[String], variable: &str, metric: &str) -> QueryResult<Vec<EpiRecord>> {
        self.fetch_series(Query::any_of("location_id", location_ids.iter().cloned()), variable, metric)
            .await
    }

    /// Peers whose latest metric value lies in the band around `focal`, focal appended
    pub async fn similar_peers(
        &self,
        focal: &EpiRecord,
        metric: &str,
        admin_levels: &[AdminLevel],
        num_to_return: usize,
    ) -> QueryResult<Vec<RankedPeer>> {
        let focal_value = focal
            .metric(metric)
            .ok_or_else(|| QueryError::Shape(format!("focal record has no `{}`", metric)))?;
        let band = SimilarityBand::new(focal_value, DEFAULT_TOLERANCE, BandMode::Logarithmic);

        let mut query = Query::and(vec![Query::term("mostRecent", "true"), band.to_query(metric)]);
        if let Some(filter) = admin_level_filter(admin_levels) {
            query = filter.and_also(query);
        }
        debug!(metric, lo = band.lo, hi = band.hi, "Searching similar locations");

        let params = QueryParams::new()
            .q(&query)
            .fields(&["location_id", metric]);
        let candidates = self
            .client
            .query_all(&params)
            .await?
            .into_iter()
            .map(serde_json::from_value::<EpiRecord>)
            .collect::<Result<Vec<_>, _>>()?;

        let mut peers = inclusive_top_k(rank_peers(&candidates, metric, focal_value), num_to_return);
        peers.push(RankedPeer {
            location_id: focal.location_id.clone(),
            value: focal_value,
            value_diff: 0.0,
        });
        Ok(peers)
    }

    async fn similarity_report(
        &self,
        location_id: &str,
        variable: &str,
        metric: &str,
        admin_levels: &[AdminLevel],
        num_to_return: usize,
    ) -> QueryResult<SimilarityReport> {
        let focal = self.latest_record(location_id, variable, metric).await?;
        let peers = self
            .similar_peers(&focal, metric, admin_levels, num_to_return)
            .await?;
        // similar_peers guarantees the focal value exists
        let focal_value = peers.last().map(|p| p.value).unwrap_or_default();

        let ids: Vec<String> = peers.into_iter().map(|p| p.location_id).collect();
        let records = self.series_for(&ids, variable, metric).await?;
        Ok(assemble_report(records, location_id, focal_value, metric))
    }

    /// Locations whose latest `metric` is closest to that of `location_id`
    ///
    /// Never fails: any stage error yields an empty report tagged `Failure`.
    pub async fn find_similar(
        &self,
        location_id: &str,
        variable: &str,
        metric: &str,
        admin_levels: &[AdminLevel],
        num_to_return: usize,
    ) -> Fetched<SimilarityReport> {
        let guard = self.tracker.begin(DATA_LOADING);
        let fetched = match self
            .similarity_report(location_id, variable, metric, admin_levels, num_to_return)
            .await
        {
            Ok(report) => {
                info!(
                    location_id,
                    metric,
                    similar = report.similar.len(),
                    "Similarity search complete"
                );
                Fetched::success(report)
            }
            Err(e) => {
                warn!(location_id, metric, error = %e, "Similarity search failed");
                Fetched::failure(e)
            }
        };
        guard.finish(fetched)
    }
}
