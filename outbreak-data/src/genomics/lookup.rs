//! Name lookups and curated report metadata

use super::mutations::MutationDetail;
use super::GenomicsApi;
use crate::client::QueryParams;
use crate::error::{QueryError, QueryResult};
use crate::normalize::{capitalize, title_case};
use crate::resources::ResourcePage;
use outbreak_common::time::CacheBucket;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Result of a wildcard name lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One curated lineage or mutation report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratedEntry {
    #[serde(default)]
    pub mutation_name: String,
    #[serde(default, rename = "reportType")]
    pub report_type: Option<String>,
    #[serde(default, rename = "variantType")]
    pub variant_type: Option<String>,
    #[serde(default)]
    pub mutations: Vec<MutationDetail>,
    /// Lineages carrying this entry's mutations (filled by the report list)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineages: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CuratedEntry {
    /// Comma-separated mutation names
    pub fn mutation_list(&self) -> String {
        self.mutations
            .iter()
            .map(|m| m.mutation.as_str())
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Curated entries sharing a report type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CuratedGroup {
    pub key: String,
    pub values: Vec<CuratedEntry>,
}

/// Order by `(variantType, mutation_name)` and nest by `reportType`
///
/// Entries without a variant type sort last. Groups appear in order of their
/// first member.
pub fn nest_curated(mut entries: Vec<CuratedEntry>) -> Vec<CuratedGroup> {
    entries.sort_by(|a, b| {
        (a.variant_type.is_none(), &a.variant_type, &a.mutation_name).cmp(&(
            b.variant_type.is_none(),
            &b.variant_type,
            &b.mutation_name,
        ))
    });

    let mut groups: Vec<CuratedGroup> = Vec::new();
    for entry in entries {
        let key = entry.report_type.clone().unwrap_or_default();
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.values.push(entry),
            None => groups.push(CuratedGroup {
                key,
                values: vec![entry],
            }),
        }
    }
    groups
}

impl GenomicsApi {
    async fn lookup(&self, path: &str, fragment: &str) -> QueryResult<Vec<LookupEntry>> {
        let params = QueryParams::new()
            .param("name", format!("*{}*", fragment))
            .timestamp(CacheBucket::Daily);
        self.client.query_as(path, &params, "/results").await
    }

    /// Countries whose name contains `fragment`
    pub async fn find_country(&self, fragment: &str) -> QueryResult<Vec<LookupEntry>> {
        let mut results = self.lookup("country", fragment).await?;
        results.iter_mut().for_each(|d| d.name = title_case(&d.name));
        Ok(results)
    }

    /// Divisions (states/provinces) whose name contains `fragment`
    pub async fn find_division(&self, fragment: &str) -> QueryResult<Vec<LookupEntry>> {
        let mut results = self.lookup("division", fragment).await?;
        results.iter_mut().for_each(|d| d.name = title_case(&d.name));
        Ok(results)
    }

    /// Pango lineages whose name contains `fragment`
    pub async fn find_lineage(&self, fragment: &str) -> QueryResult<Vec<LookupEntry>> {
        let mut results = self.lookup("lineage", fragment).await?;
        results.iter_mut().for_each(|d| d.name = capitalize(&d.name));
        Ok(results)
    }

    async fn curated_entries(&self) -> QueryResult<Vec<CuratedEntry>> {
        self.client
            .query_as(&self.curated_url, &QueryParams::new(), "")
            .await
    }

    /// Curated reports grouped by report type
    pub async fn curated_list(&self) -> QueryResult<Vec<CuratedGroup>> {
        let entries = self.curated_entries().await?;
        debug!(count = entries.len(), "Loaded curated reports");
        Ok(nest_curated(entries))
    }

    /// The single curated entry named `name`
    pub async fn curated_metadata(&self, name: &str) -> QueryResult<CuratedEntry> {
        let mut matches: Vec<CuratedEntry> = self
            .curated_entries()
            .await?
            .into_iter()
            .filter(|d| d.mutation_name == name)
            .collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            n => Err(QueryError::Shape(format!(
                "expected one curated report for {}, found {}",
                name, n
            ))),
        }
    }

    /// Resources mentioning a lineage, newest first by default
    pub async fn lineage_resources(
        &self,
        query: &str,
        size: usize,
        page: usize,
        sort: Option<&str>,
    ) -> QueryResult<ResourcePage> {
        let params = QueryParams::new()
            .param("q", query)
            .sort(sort.unwrap_or("-date"))
            .size(size)
            .offset(page)
            .fields(&["@type", "name", "author", "date", "journalName"])
            .timestamp(CacheBucket::Hourly);
        let mut found: ResourcePage = self.resources.query_as("query", &params, "").await?;
        found.results.iter_mut().for_each(|hit| hit.format_date());
        Ok(found)
    }
}
