//! Page-level report assemblers
//!
//! Each assembler fans out independent leaf queries, catches failures per
//! member (logged with a diagnostic tag, replaced by an empty value) and
//! returns one view-model wrapped in [`Fetched`]. The loading flag for the
//! page region is raised for the duration of the call.

use super::lookup::{CuratedEntry, CuratedGroup};
use super::mutations::{LineagePrevalence, MutationDetail, CHARACTERISTIC_FREQUENCY};
use super::prevalence::{
    CumulativePrevalence, DateUpdated, LineageShare, LineagesByDay, LocationPrevalence, NewToday,
    PrevalencePoint,
};
use super::{GenomicsApi, GenomicsQuery, Location, LocationType};
use crate::aggregate::{join_ordered, settle, settle_with_error};
use crate::error::{QueryError, QueryResult};
use crate::normalize::format_count;
use crate::status::{
    Fetched, LINEAGE_COMPARISON_REGION, LOCATION_BASIC_LOADING, LOCATION_LINEAGES_LOADING,
    LOCATION_MAPS_LOADING, LOCATION_TABLE_LOADING, LOCATION_TEMPORAL_LOADING, REPORT_DATA_REGION,
    REPORT_LIST_REGION, REPORT_LOADING, REPORT_LOCATIONS_REGION, SEQUENCING_SUMMARY_REGION,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Default prevalence cutoff when attaching lineages to curated mutations
pub const REPORT_LIST_THRESHOLD: f64 = 0.75;

/// Lineage bucket collecting everything below the reporting threshold
const OTHER_LINEAGE: &str = "Other";

/// A labeled selection tracked on a location report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedQuery {
    pub label: String,
    pub query: GenomicsQuery,
    #[serde(default)]
    pub variant_type: Option<String>,
}

impl TrackedQuery {
    pub fn lineage(name: impl Into<String>, variant_type: Option<String>) -> Self {
        let name = name.into();
        Self {
            query: GenomicsQuery::lineage(name.clone()),
            label: name,
            variant_type,
        }
    }
}

/// Curated reports with the build date
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportList {
    pub date_updated: Option<String>,
    pub md: Vec<CuratedGroup>,
}

/// Everything shown on a lineage/mutation report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportData {
    pub date_updated: DateUpdated,
    pub new_today: Vec<NewToday>,
    pub longitudinal: Vec<PrevalencePoint>,
    pub global_prev: CumulativePrevalence,
    pub loc_prev: Vec<CumulativePrevalence>,
    pub by_country: Vec<LocationPrevalence>,
    pub countries: Vec<String>,
    pub states: Vec<String>,
    pub md: Option<CuratedEntry>,
    /// Curated mutations when available, else the characteristic mutations
    pub mutations: Vec<MutationDetail>,
    pub mutation_details: Vec<MutationDetail>,
    pub mutations_by_lineage: Vec<LineagePrevalence>,
}

/// Location-dependent part of a report, refreshed when the location changes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationUpdate {
    pub longitudinal: Vec<PrevalencePoint>,
    pub by_country: Vec<LocationPrevalence>,
    pub loc_prev: Vec<CumulativePrevalence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicLocationReport {
    pub date_updated: DateUpdated,
    /// Curated lineages to track, when the curated list has a lineage group
    pub curated: Vec<TrackedQuery>,
    pub total: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationReport {
    pub lineages_by_day: LineagesByDay,
    pub most_recent_lineages: Vec<LineageShare>,
    /// `"Other"` first, then every other lineage seen
    pub lineage_domain: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedPrevalence {
    pub key: String,
    pub variant_type: Option<String>,
    pub values: Vec<LocationPrevalence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedCumulative {
    pub label: String,
    pub variant_type: Option<String>,
    #[serde(flatten)]
    pub prevalence: CumulativePrevalence,
}

/// Table rows sharing a variant type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariantGroup {
    pub key: String,
    pub values: Vec<TrackedCumulative>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedTemporal {
    pub label: String,
    pub variant_type: Option<String>,
    pub data: Vec<PrevalencePoint>,
}

/// Characteristic-mutation prevalence of one mutation across lineages
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationRow {
    pub mutation: String,
    pub gene: Option<String>,
    /// Aligned with [`LineageComparison::lineages`]; `None` where not characteristic
    pub prevalence: Vec<Option<f64>>,
}

/// Lineage × mutation prevalence matrix
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineageComparison {
    pub lineages: Vec<String>,
    pub rows: Vec<MutationRow>,
}

/// Sequences in one location and its share of the worldwide total
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequenceShare {
    pub name: String,
    pub location_type: Option<LocationType>,
    pub count: u64,
    pub count_formatted: String,
    pub share: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequencingSummary {
    pub total: u64,
    pub total_formatted: String,
    /// Largest first
    pub locations: Vec<SequenceShare>,
}

/// `"Other"` followed by the remaining lineages in first-seen order
pub fn lineage_domain(most_recent: &[LineageShare], by_day: &LineagesByDay) -> Vec<String> {
    let mut domain = vec![OTHER_LINEAGE.to_string()];
    let candidates = most_recent
        .iter()
        .map(|s| &s.lineage)
        .chain(by_day.lineages.iter());
    for lineage in candidates {
        if !domain.contains(lineage) {
            domain.push(lineage.clone());
        }
    }
    domain
}

/// Merge per-lineage characteristic mutations into one matrix
///
/// Rows follow first appearance across the lineages in order.
pub fn mutation_matrix(lineages: &[String], per_lineage: &[Vec<MutationDetail>]) -> LineageComparison {
    let mut rows: Vec<MutationRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (column, mutations) in per_lineage.iter().enumerate() {
        for m in mutations {
            let row = *index.entry(m.mutation.clone()).or_insert_with(|| {
                rows.push(MutationRow {
                    mutation: m.mutation.clone(),
                    gene: m.gene.clone(),
                    prevalence: vec![None; lineages.len()],
                });
                rows.len() - 1
            });
            if let Some(cell) = rows[row].prevalence.get_mut(column) {
                *cell = Some(m.prevalence.unwrap_or(0.0));
            }
        }
    }
    LineageComparison {
        lineages: lineages.to_vec(),
        rows,
    }
}

/// Nest table rows by variant type: type ascending, prevalence descending
pub fn group_by_variant(mut rows: Vec<TrackedCumulative>) -> Vec<VariantGroup> {
    rows.sort_by(|a, b| {
        a.variant_type.cmp(&b.variant_type).then_with(|| {
            b.prevalence
                .global_prevalence
                .total_cmp(&a.prevalence.global_prevalence)
        })
    });
    let mut groups: Vec<VariantGroup> = Vec::new();
    for row in rows {
        let key = row.variant_type.clone().unwrap_or_default();
        match groups.last_mut() {
            Some(group) if group.key == key => group.values.push(row),
            _ => groups.push(VariantGroup {
                key,
                values: vec![row],
            }),
        }
    }
    groups
}

impl GenomicsApi {
    async fn optional_curated_metadata(&self, lineage: Option<&str>) -> QueryResult<Option<CuratedEntry>> {
        let Some(lineage) = lineage else {
            return Ok(None);
        };
        match self.curated_metadata(lineage).await {
            Ok(md) => Ok(Some(md)),
            Err(QueryError::Shape(reason)) => {
                debug!(lineage, reason = %reason, "No curated report");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Curated report list, with lineages attached to each curated mutation
    pub async fn report_list(&self, prevalence_threshold: f64) -> Fetched<ReportList> {
        let guard = self.tracker.begin_region(REPORT_LIST_REGION, REPORT_LOADING);

        let ((date_updated, e1), (mut md, e2)) = tokio::join!(
            settle_with_error("genomics.report_list.date_updated", self.date_updated()),
            settle_with_error("genomics.report_list.curated", self.curated_list()),
        );

        if let Some(group) = md.iter_mut().find(|g| g.key == "mutation") {
            let lookups = group.values.iter().map(|entry| {
                let mutations = entry.mutation_list();
                async move {
                    settle(
                        "genomics.report_list.lineages",
                        self.mutations_by_lineage(&mutations, prevalence_threshold),
                    )
                    .await
                }
            });
            let lineages = join_ordered(lookups).await;
            for (entry, found) in group.values.iter_mut().zip(lineages) {
                entry.lineages = found.into_iter().map(|l| l.pangolin_lineage).collect();
            }
        }

        let report = ReportList {
            date_updated: date_updated.last_updated,
            md,
        };
        guard.finish(Fetched::from_members(report, vec![e1, e2]))
    }

    /// Full lineage/mutation report for a selection and a focus location
    pub async fn report_data(
        &self,
        locations: &[Location],
        mutations: Option<&str>,
        lineage: Option<&str>,
        location: &Location,
    ) -> Fetched<ReportData> {
        let guard = self.tracker.begin_region(REPORT_DATA_REGION, REPORT_LOADING);
        let query = GenomicsQuery::new(lineage, mutations);
        let mutation_list = query.mutations.clone().unwrap_or_default();
        let lineage_name = query.lineage.clone();
        let world = Location::worldwide();
        let usa = Location::country("United States");

        let characteristic = async {
            match lineage_name.as_deref() {
                Some(l) => self.characteristic_mutations(l, CHARACTERISTIC_FREQUENCY).await,
                None => Ok(Vec::new()),
            }
        };

        let (
            (date_updated, e1),
            new_today,
            (longitudinal, e2),
            (global_prev, e3),
            loc_prev,
            (countries, e4),
            (states, e5),
            (by_country, e6),
            (md, e7),
            (characteristic, e8),
            (mutation_details, e9),
            (mutations_by_lineage, e10),
        ) = tokio::join!(
            settle_with_error("genomics.report.date_updated", self.date_updated()),
            self.new_today_all(&query, locations),
            settle_with_error("genomics.report.temporal", self.temporal_prevalence(location, &query)),
            settle_with_error("genomics.report.world", self.world_prevalence(&query)),
            self.cumulative_prevalences(&query, locations),
            settle_with_error("genomics.report.countries", self.positive_locations(&query, &world)),
            settle_with_error("genomics.report.states", self.positive_locations(&query, &usa)),
            settle_with_error(
                "genomics.report.by_location",
                self.location_prevalence(&query, location, None)
            ),
            settle_with_error(
                "genomics.report.curated",
                self.optional_curated_metadata(lineage_name.as_deref())
            ),
            settle_with_error("genomics.report.characteristic", characteristic),
            settle_with_error("genomics.report.details", self.mutation_details(&mutation_list)),
            settle_with_error(
                "genomics.report.by_lineage",
                self.mutations_by_lineage(&mutation_list, 0.0)
            ),
        );

        let curated_mutations = md
            .as_ref()
            .filter(|md| md.mutations.iter().any(|m| !m.mutation.is_empty()))
            .map(|md| md.mutations.clone());

        let report = ReportData {
            date_updated,
            new_today,
            longitudinal,
            global_prev,
            loc_prev,
            by_country,
            countries,
            states,
            mutations: curated_mutations.unwrap_or(characteristic),
            md,
            mutation_details,
            mutations_by_lineage,
        };
        info!(
            lineage = ?query.lineage,
            mutations = ?query.mutations,
            location = %location,
            "Report assembled"
        );
        guard.finish(Fetched::from_members(
            report,
            vec![e1, e2, e3, e4, e5, e6, e7, e8, e9, e10],
        ))
    }

    /// Location-dependent report sections for a new focus location
    pub async fn update_location_data(
        &self,
        mutations: Option<&str>,
        lineage: Option<&str>,
        locations: &[Location],
        location: &Location,
    ) -> Fetched<LocationUpdate> {
        let guard = self.tracker.begin_region(REPORT_LOCATIONS_REGION, REPORT_LOADING);
        let query = GenomicsQuery::new(lineage, mutations);

        let ((longitudinal, e1), (by_country, e2), loc_prev) = tokio::join!(
            settle_with_error("genomics.update.temporal", self.temporal_prevalence(location, &query)),
            settle_with_error(
                "genomics.update.by_location",
                self.location_prevalence(&query, location, None)
            ),
            self.cumulative_prevalences(&query, locations),
        );

        let update = LocationUpdate {
            longitudinal,
            by_country,
            loc_prev,
        };
        guard.finish(Fetched::from_members(update, vec![e1, e2]))
    }

    /// Build date, curated lineages and sequence total for a location page
    pub async fn basic_location_report(&self, location: &Location) -> Fetched<BasicLocationReport> {
        let guard = self.tracker.begin(LOCATION_BASIC_LOADING);
        let counted = if location.is_world() { None } else { Some(location) };

        let ((date_updated, e1), (curated, e2), (total, e3)) = tokio::join!(
            settle_with_error("genomics.location.date_updated", self.date_updated()),
            settle_with_error("genomics.location.curated", self.curated_list()),
            settle_with_error(
                "genomics.location.total",
                async { self.sequence_count(counted).await.map(Some) }
            ),
        );

        let lineage_groups: Vec<&CuratedGroup> = curated.iter().filter(|g| g.key == "lineage").collect();
        let tracked: Vec<TrackedQuery> = match lineage_groups.as_slice() {
            [group] => group
                .values
                .iter()
                .map(|d| TrackedQuery::lineage(d.mutation_name.clone(), d.variant_type.clone()))
                .collect(),
            _ => Vec::new(),
        };

        let report = BasicLocationReport {
            date_updated,
            curated: tracked,
            total: total.map(|t| format_count(t as i64)),
        };
        guard.finish(Fetched::from_members(report, vec![e1, e2, e3]))
    }

    /// All-lineage breakdowns for a location page
    pub async fn location_report(
        &self,
        location: &Location,
        other_threshold: f64,
        nday_threshold: u32,
        ndays: u32,
    ) -> Fetched<LocationReport> {
        let guard = self.tracker.begin(LOCATION_LINEAGES_LOADING);

        let ((lineages_by_day, e1), (most_recent_lineages, e2)) = tokio::join!(
            settle_with_error(
                "genomics.location.lineages_by_day",
                self.prevalence_all_lineages(location, other_threshold, nday_threshold, ndays)
            ),
            settle_with_error(
                "genomics.location.recent_lineages",
                self.cumulative_prevalence_all_lineages(location, other_threshold, nday_threshold, ndays)
            ),
        );

        let report = LocationReport {
            lineage_domain: lineage_domain(&most_recent_lineages, &lineages_by_day),
            lineages_by_day,
            most_recent_lineages,
        };
        guard.finish(Fetched::from_members(report, vec![e1, e2]))
    }

    /// Sub-location prevalence maps, one per tracked selection
    pub async fn location_maps(
        &self,
        location: &Location,
        tracked: &[TrackedQuery],
        ndays: Option<u32>,
    ) -> Fetched<Vec<TrackedPrevalence>> {
        let guard = self.tracker.begin(LOCATION_MAPS_LOADING);
        let tasks = tracked.iter().map(|t| async move {
            let (values, error) = settle_with_error(
                "genomics.location.maps",
                self.location_prevalence(&t.query, location, ndays),
            )
            .await;
            let map = TrackedPrevalence {
                key: t.label.clone(),
                variant_type: t.variant_type.clone(),
                values,
            };
            (map, error)
        });
        let (maps, errors): (Vec<_>, Vec<_>) = join_ordered(tasks).await.into_iter().unzip();
        guard.finish(Fetched::from_members(maps, errors))
    }

    /// Cumulative prevalence of each tracked selection, nested by variant type
    pub async fn location_table(&self, location: &Location, tracked: &[TrackedQuery]) -> Fetched<Vec<VariantGroup>> {
        let guard = self.tracker.begin(LOCATION_TABLE_LOADING);
        let tasks = tracked.iter().map(|t| async move {
            let result = self.cumulative_prevalence(&t.query, location).await;
            result.map(|prevalence| TrackedCumulative {
                label: t.label.clone(),
                variant_type: t.variant_type.clone(),
                prevalence,
            })
        });

        let mut rows = Vec::new();
        let mut errors = Vec::new();
        for result in join_ordered(tasks).await {
            match result {
                Ok(row) => {
                    rows.push(row);
                    errors.push(None);
                }
                Err(e) => {
                    warn!(tag = "genomics.location.table", error = %e, "Query failed, dropping row");
                    errors.push(Some(e));
                }
            }
        }
        guard.finish(Fetched::from_members(group_by_variant(rows), errors))
    }

    /// Daily prevalence of each tracked selection
    pub async fn all_temporal_prevalences(
        &self,
        location: &Location,
        tracked: &[TrackedQuery],
    ) -> Fetched<Vec<TrackedTemporal>> {
        let guard = self.tracker.begin(LOCATION_TEMPORAL_LOADING);
        let tasks = tracked.iter().map(|t| async move {
            let (data, error) = settle_with_error(
                "genomics.location.temporal",
                self.temporal_prevalence(location, &t.query),
            )
            .await;
            let series = TrackedTemporal {
                label: t.label.clone(),
                variant_type: t.variant_type.clone(),
                data,
            };
            (series, error)
        });
        let (series, errors): (Vec<_>, Vec<_>) = join_ordered(tasks).await.into_iter().unzip();
        guard.finish(Fetched::from_members(series, errors))
    }

    /// Characteristic mutations of several lineages side by side
    pub async fn compare_lineages(&self, lineages: &[String], frequency: f64) -> Fetched<LineageComparison> {
        let guard = self.tracker.begin_region(LINEAGE_COMPARISON_REGION, REPORT_LOADING);
        let tasks = lineages.iter().map(|lineage| {
            settle_with_error(
                "genomics.compare.characteristic",
                self.characteristic_mutations(lineage, frequency),
            )
        });
        let (per_lineage, errors): (Vec<_>, Vec<_>) = join_ordered(tasks).await.into_iter().unzip();
        let comparison = mutation_matrix(lineages, &per_lineage);
        info!(
            lineages = lineages.len(),
            mutations = comparison.rows.len(),
            "Lineage comparison assembled"
        );
        guard.finish(Fetched::from_members(comparison, errors))
    }

    /// Sequence counts per location with their share of the worldwide total
    pub async fn sequencing_summary(&self, locations: &[Location]) -> Fetched<SequencingSummary> {
        let guard = self.tracker.begin_region(SEQUENCING_SUMMARY_REGION, REPORT_LOADING);
        let places: Vec<&Location> = locations.iter().filter(|l| !l.is_world()).collect();

        let counts = places.iter().copied().map(|location| async move {
            settle_with_error("genomics.sequencing.location", self.sequence_count(Some(location))).await
        });
        let ((total, total_error), per_location) = tokio::join!(
            settle_with_error("genomics.sequencing.total", self.sequence_count(None)),
            join_ordered(counts),
        );

        let mut errors = vec![total_error.clone()];
        let mut shares: Vec<SequenceShare> = Vec::new();
        for (location, (count, error)) in places.into_iter().zip(per_location) {
            let failed = error.is_some();
            errors.push(error);
            if failed {
                continue;
            }
            shares.push(SequenceShare {
                name: location.name.clone(),
                location_type: Some(location.kind),
                count,
                count_formatted: format_count(count as i64),
                share: (total_error.is_none() && total > 0).then(|| count as f64 / total as f64),
            });
        }
        shares.sort_by(|a, b| b.count.cmp(&a.count));

        let summary = SequencingSummary {
            total,
            total_formatted: format_count(total as i64),
            locations: shares,
        };
        guard.finish(Fetched::from_members(summary, errors))
    }
}
