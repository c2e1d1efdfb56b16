//! Resources API: literature, datasets and clinical trials
//!
//! Search pages combine three independent queries (most recent items, one
//! page of metadata, facet counts) into a single view-model. Source summaries
//! combine per-source counts with the backend build date.

use crate::aggregate::{join_ordered, settle_with_error};
use crate::client::{pluck, QueryClient, QueryParams};
use crate::error::{QueryError, QueryResult};
use crate::normalize::{format_count, format_date_long, parse_date, truncate_words};
use crate::query::{combine_search, FilterTerm, Query};
use crate::status::{
    Fetched, GenerationTracker, CLINICAL_TRIALS_REGION, RESOURCES_LOADING, RESOURCE_METADATA_REGION,
    RESOURCE_SEARCH_REGION,
};
use chrono::NaiveDateTime;
use outbreak_common::time::CacheBucket;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Words kept in a short description
pub const MAX_DESCRIPTION_WORDS: usize = 75;

/// Facets requested for a search page
pub const DEFAULT_FACETS: [&str; 7] = [
    "@type",
    "curatedBy.name",
    "keywords",
    "topicCategory",
    "funding.funder.name",
    "measurementTechnique",
    "variableMeasured",
];

/// Display order of facets
const FACET_ORDER: [&str; 7] = [
    "@type",
    "topicCategory",
    "curatedBy.name",
    "keywords",
    "funding.funder.name",
    "measurementTechnique",
    "variableMeasured",
];

const MOST_RECENT_FIELDS: [&str; 7] = [
    "@type",
    "name",
    "author",
    "creator",
    "datePublished",
    "dateModified",
    "dateCreated",
];

const SUMMARY_FIELDS: [&str; 12] = [
    "@type",
    "name",
    "identifierSource",
    "interventions",
    "studyStatus",
    "armGroup",
    "studyLocation",
    "studyDesign",
    "datePublished",
    "journalName",
    "journalNameAbbrev",
    "author",
];

/// Intervention tracked by the clinical-trial summary
pub const DEFAULT_TRIAL_INTERVENTION: &str = "hydroxychloroquine";

const TRIAL_SUMMARY_FIELDS: [&str; 4] = [
    "armGroup.name",
    "armGroup.intervention",
    "dateCreated",
    "studyStatus",
];

/// One search hit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceHit {
    #[serde(default, rename = "_id")]
    pub id: Option<String>,
    #[serde(default, rename = "@type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "dateModified")]
    pub date_modified: Option<String>,
    #[serde(default, rename = "datePublished")]
    pub date_published: Option<String>,
    #[serde(default, rename = "dateCreated")]
    pub date_created: Option<String>,
    /// Modified, else published, else created date
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_formatted: Option<String>,
    #[serde(default, rename = "abstract", deserialize_with = "de_text")]
    pub abstract_text: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default)]
    pub description_too_long: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceHit {
    /// Pick the display date from modified/published/created
    pub fn resolve_date(&mut self) {
        let resolved = self
            .date_modified
            .clone()
            .or_else(|| self.date_published.clone())
            .or_else(|| self.date_created.clone());
        if resolved.is_some() {
            self.date = resolved;
        }
    }

    /// Long-format the `date` field
    pub fn format_date(&mut self) {
        self.date_formatted = self
            .date
            .as_deref()
            .and_then(parse_date)
            .map(format_date_long);
    }

    /// Abstract (else description) plus its first words
    pub fn summarize_description(&mut self) {
        self.long_description = self.abstract_text.clone().or_else(|| self.description.clone());
        if let Some(long) = &self.long_description {
            let (short, too_long) = truncate_words(long, MAX_DESCRIPTION_WORDS);
            self.short_description = Some(short);
            self.description_too_long = too_long;
        }
    }
}

/// A string, or the first string of an array
fn de_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => items.into_iter().find_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        }),
        _ => None,
    })
}

/// Facet term as a string whatever its JSON type
fn de_term<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// One page of hits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePage {
    #[serde(default, alias = "hits")]
    pub results: Vec<ResourceHit>,
    #[serde(default)]
    pub total: u64,
}

/// Count for one facet value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetTerm {
    #[serde(default, deserialize_with = "de_term")]
    pub term: String,
    #[serde(default)]
    pub count: u64,
    /// Value is selected in the active filter
    #[serde(default)]
    pub checked: bool,
}

/// Counts for one facet field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Facet {
    /// Display label
    pub variable: String,
    /// Field name without a `.keyword` suffix
    pub id: String,
    pub counts: Vec<FacetTerm>,
    pub total: usize,
}

/// Display label for a facet field
pub fn facet_label(field: &str) -> String {
    match field {
        "curatedBy.name" => "source".to_string(),
        "funding.funder.name" => "funding".to_string(),
        "measurementTechnique" => "measurement technique".to_string(),
        "topicCategory" => "topic".to_string(),
        "variableMeasured" => "variable measured".to_string(),
        other => other.trim_start_matches('@').to_string(),
    }
}

fn facet_rank(id: &str) -> usize {
    FACET_ORDER
        .iter()
        .position(|f| *f == id)
        .unwrap_or(FACET_ORDER.len())
}

/// Build facets from a `facets` response object, marking filtered terms
pub fn build_facets(raw: &Map<String, Value>, filters: &[FilterTerm]) -> QueryResult<Vec<Facet>> {
    let mut facets = raw
        .iter()
        .map(|(key, body)| -> QueryResult<Facet> {
            let id = key.trim_end_matches(".keyword").to_string();
            let selected: Vec<&FilterTerm> = filters.iter().filter(|f| f.key == id).collect();
            let mut counts: Vec<FacetTerm> =
                serde_json::from_value(pluck(body, "/terms")?.clone())?;
            for term in &mut counts {
                term.checked = match selected.as_slice() {
                    [only] => only.values.contains(&term.term),
                    _ => false,
                };
            }
            Ok(Facet {
                variable: facet_label(&id),
                total: counts.len(),
                id,
                counts,
            })
        })
        .collect::<QueryResult<Vec<_>>>()?;
    facets.sort_by_key(|f| facet_rank(&f.id));
    Ok(facets)
}

fn newest_first(a: &ResourceHit, b: &ResourceHit) -> Ordering {
    match (&a.date, &b.date) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Search page: metadata page, most recent items and facets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSearch {
    pub results: Vec<ResourceHit>,
    pub total: u64,
    pub recent: Vec<ResourceHit>,
    pub facets: Vec<Facet>,
}

/// Most recent items of each major type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MostRecentGroup {
    pub publication: Vec<ResourceHit>,
    pub dataset: Vec<ResourceHit>,
    pub clinicaltrial: Vec<ResourceHit>,
}

/// Named set of search terms summarized by resource type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryQuery {
    pub name: String,
    pub terms: Vec<String>,
}

/// Per-type count for one summary query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeCount {
    pub term: String,
    pub count: u64,
    /// Summary query name
    pub x: String,
    /// Resource type
    pub y: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuerySummary {
    pub key: SummaryQuery,
    pub total: u64,
    pub types: Vec<TypeCount>,
}

/// Resource counts as a tree: type → source
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SourceNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceCounts {
    pub total: u64,
    pub total_formatted: String,
    pub sources: SourceNode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceSummary {
    pub counts: SourceCounts,
    pub date_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeBucket {
    #[serde(default, deserialize_with = "de_term")]
    term: String,
    #[serde(default)]
    count: u64,
    #[serde(default, rename = "curatedBy.name")]
    curated_by: SourceBuckets,
}

#[derive(Debug, Default, Deserialize)]
struct SourceBuckets {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    terms: Vec<FacetTerm>,
}

fn source_name(term: &str) -> String {
    term.replace("ClinicalTrials.gov", "NCT")
        .replace("WHO International Clinical Trials Registry Platform", "WHO")
}

/// Build the type → source tree
///
/// Items of a type without a curating source are attributed to Zenodo.
fn source_tree(buckets: Vec<TypeBucket>) -> SourceNode {
    let children = buckets
        .into_iter()
        .map(|bucket| {
            let mut sources: Vec<SourceNode> = bucket
                .curated_by
                .terms
                .iter()
                .map(|t| SourceNode {
                    name: source_name(&t.term),
                    count: Some(t.count),
                    children: Vec::new(),
                })
                .collect();
            let uncurated = bucket.count.saturating_sub(bucket.curated_by.total);
            if uncurated > 0 {
                sources.push(SourceNode {
                    name: "Zenodo".to_string(),
                    count: Some(uncurated),
                    children: Vec::new(),
                });
            }
            SourceNode {
                name: bucket.term,
                count: None,
                children: sources,
            }
        })
        .collect();
    SourceNode {
        name: "root".to_string(),
        count: None,
        children,
    }
}

/// Handle on the resources backend
#[derive(Clone)]
pub struct ResourcesApi {
    client: QueryClient,
    tracker: GenerationTracker,
}

impl ResourcesApi {
    pub fn new(client: QueryClient, tracker: GenerationTracker) -> Self {
        Self { client, tracker }
    }

    /// One page of hits, newest first, with dates and descriptions resolved
    pub async fn metadata_page(&self, query: &Query, sort: Option<&str>, size: usize, page: usize) -> QueryResult<ResourcePage> {
        let params = QueryParams::new()
            .q(query)
            .param_opt("sort", sort)
            .size(size)
            .offset(page)
            .timestamp(CacheBucket::Resources);
        let mut found: ResourcePage = self.client.query_as("query", &params, "").await?;
        for hit in &mut found.results {
            hit.resolve_date();
            hit.summarize_description();
        }
        found.results.sort_by(newest_first);
        Ok(found)
    }

    /// Facet counts for a query, marking values selected in `filters`
    pub async fn resource_facets(
        &self,
        query: &Query,
        filters: &[FilterTerm],
        facets: &[&str],
    ) -> QueryResult<Vec<Facet>> {
        let params = QueryParams::new()
            .q(query)
            .size(0)
            .param("facet_size", 100)
            .param("facets", facets.join(","))
            .timestamp(CacheBucket::Resources);
        let payload = self.client.query("query", &params).await?;
        let raw = pluck(&payload, "/facets")?
            .as_object()
            .ok_or_else(|| QueryError::Shape("`facets` is not an object".to_string()))?;
        build_facets(raw, filters)
    }

    /// The newest `size` hits for a query
    pub async fn most_recent(&self, query: &Query, sort: Option<&str>, size: usize) -> QueryResult<Vec<ResourceHit>> {
        let params = QueryParams::new()
            .q(query)
            .fields(&MOST_RECENT_FIELDS)
            .size(size)
            .sort(sort.unwrap_or("-datePublished"))
            .timestamp(CacheBucket::Resources);
        let mut hits: Vec<ResourceHit> = self.client.query_as("query", &params, "/hits").await?;
        hits.iter_mut().for_each(ResourceHit::resolve_date);
        Ok(hits)
    }

    /// Search page for a free-text query and a `key:v1,v2;key2:v3` filter
    pub async fn resources(
        &self,
        query: Option<&str>,
        filter: Option<&str>,
        sort: Option<&str>,
        size: usize,
        page: usize,
    ) -> Fetched<ResourceSearch> {
        let guard = self.tracker.begin_region(RESOURCE_SEARCH_REGION, RESOURCES_LOADING);
        let (combined, filters) = combine_search(query, filter);
        debug!(query = %combined, "Searching resources");

        let ((recent, e1), (found, e2), (facets, e3)) = tokio::join!(
            settle_with_error("resources.most_recent", self.most_recent(&combined, None, 3)),
            settle_with_error(
                "resources.metadata_page",
                self.metadata_page(&combined, sort, size, page)
            ),
            settle_with_error(
                "resources.facets",
                self.resource_facets(&combined, &filters, &DEFAULT_FACETS)
            ),
        );

        let search = ResourceSearch {
            results: found.results,
            total: found.total,
            recent,
            facets,
        };
        info!(total = search.total, "Resource search complete");
        guard.finish(Fetched::from_members(search, vec![e1, e2, e3]))
    }

    /// Full record for one resource
    pub async fn resource_metadata(&self, id: &str) -> Fetched<Option<ResourceHit>> {
        let guard = self.tracker.begin_region(RESOURCE_METADATA_REGION, RESOURCES_LOADING);
        let query = if id.starts_with("zenodo") {
            Query::raw(id)
        } else {
            Query::phrase("_id", id)
        };
        let params = QueryParams::new()
            .q(&query)
            .size(1)
            .timestamp(CacheBucket::Resources);

        let result = self
            .client
            .query_as::<Vec<ResourceHit>>("query", &params, "/hits")
            .await
            .and_then(|hits| {
                hits.into_iter()
                    .next()
                    .ok_or_else(|| QueryError::Shape(format!("no resource with id {}", id)))
            })
            .map(|mut hit| {
                hit.resolve_date();
                Some(hit)
            });
        guard.finish(Fetched::from_result(result))
    }

    /// Most recent publications, datasets and clinical trials
    pub async fn most_recent_group(&self, sort: Option<&str>, size: usize) -> Fetched<MostRecentGroup> {
        let publications = Query::term("@type", "Publication");
        let datasets = Query::term("@type", "Dataset");
        let trials = Query::term("@type", "ClinicalTrial");
        let ((publication, e1), (dataset, e2), (clinicaltrial, e3)) = tokio::join!(
            settle_with_error("resources.publications", self.most_recent(&publications, sort, size)),
            settle_with_error("resources.datasets", self.most_recent(&datasets, sort, size)),
            settle_with_error("resources.clinical_trials", self.most_recent(&trials, sort, size)),
        );
        Fetched::from_members(
            MostRecentGroup {
                publication,
                dataset,
                clinicaltrial,
            },
            vec![e1, e2, e3],
        )
    }

    /// Total hits and per-type counts for one summary query
    pub async fn query_summary(&self, summary: &SummaryQuery) -> QueryResult<QuerySummary> {
        let params = QueryParams::new()
            .q(&Query::any_value(summary.terms.iter().cloned()))
            .timestamp(CacheBucket::Resources)
            .size(1000)
            .fields(&SUMMARY_FIELDS)
            .param("facets", "@type,curatedBy.name")
            .param("facet_size", 25);
        let payload = self.client.query("query", &params).await?;
        let total = pluck(&payload, "/total")?.as_u64().unwrap_or(0);
        let terms: Vec<FacetTerm> = serde_json::from_value(pluck(&payload, "/facets/@type/terms")?.clone())?;
        Ok(QuerySummary {
            key: summary.clone(),
            total,
            types: terms
                .into_iter()
                .map(|t| TypeCount {
                    x: summary.name.clone(),
                    y: t.term.clone(),
                    term: t.term,
                    count: t.count,
                })
                .collect(),
        })
    }

    /// Summaries for several queries, in input order; failures drop out
    pub async fn query_summaries(&self, queries: &[SummaryQuery]) -> Fetched<Vec<QuerySummary>> {
        let results = join_ordered(queries.iter().map(|q| self.query_summary(q))).await;
        let mut summaries = Vec::with_capacity(results.len());
        let mut errors = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(summary) => {
                    summaries.push(summary);
                    errors.push(None);
                }
                Err(e) => {
                    warn!(tag = "resources.query_summary", error = %e, "Query failed, substituting empty result");
                    errors.push(Some(e));
                }
            }
        }
        Fetched::from_members(summaries, errors)
    }

    /// Clinical trials mentioning an intervention by name or description
    ///
    /// Arm groups and study status come back in [`ResourceHit::extra`].
    pub async fn ct_summary(&self, intervention: &str) -> Fetched<Vec<ResourceHit>> {
        let guard = self.tracker.begin_region(CLINICAL_TRIALS_REGION, RESOURCES_LOADING);
        let query = Query::or(vec![
            Query::phrase("name", intervention),
            Query::phrase("description", intervention),
        ]);
        let params = QueryParams::new()
            .q(&query)
            .fields(&TRIAL_SUMMARY_FIELDS)
            .size(1000)
            .timestamp(CacheBucket::Resources);

        let result = self
            .client
            .query_as::<Vec<ResourceHit>>("query", &params, "/hits")
            .await;
        if let Ok(trials) = &result {
            info!(intervention, trials = trials.len(), "Clinical trial summary loaded");
        }
        guard.finish(Fetched::from_result(result))
    }

    /// Resource counts by type and curating source
    pub async fn source_counts(&self) -> QueryResult<SourceCounts> {
        let params = QueryParams::new()
            .param("aggs", "@type(curatedBy.name)")
            .param("facet_size", 100)
            .timestamp(CacheBucket::Resources);
        let payload = self.client.query("query", &params).await?;
        let total = pluck(&payload, "/total")?.as_u64().unwrap_or(0);
        let buckets: Vec<TypeBucket> = serde_json::from_value(pluck(&payload, "/facets/@type/terms")?.clone())?;
        Ok(SourceCounts {
            total,
            total_formatted: format_count(total as i64),
            sources: source_tree(buckets),
        })
    }

    /// Backend build date as `"05 March 2021"`
    pub async fn build_date(&self) -> QueryResult<Option<String>> {
        let raw: Option<String> = self
            .client
            .query_as("metadata", &QueryParams::new(), "/build_date")
            .await?;
        Ok(raw.as_deref().and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.format("%d %B %Y").to_string())
        }))
    }

    /// Source counts plus build date
    pub async fn source_summary(&self) -> Fetched<SourceSummary> {
        let ((counts, e1), (date_modified, e2)) = tokio::join!(
            settle_with_error("resources.source_counts", self.source_counts()),
            settle_with_error("resources.build_date", self.build_date()),
        );
        Fetched::from_members(
            SourceSummary {
                counts,
                date_modified,
            },
            vec![e1, e2],
        )
    }
}
