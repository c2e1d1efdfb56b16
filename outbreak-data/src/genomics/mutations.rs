//! Mutation-level lookups

use super::GenomicsApi;
use crate::client::QueryParams;
use crate::error::QueryResult;
use crate::normalize::{capitalize, de_lenient_f64, proportion_label};
use outbreak_common::time::CacheBucket;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Default `frequency` cutoff for characteristic mutations
pub const CHARACTERISTIC_FREQUENCY: f64 = 0.97;

/// One amino-acid or nucleotide change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationDetail {
    #[serde(default)]
    pub mutation: String,
    #[serde(default)]
    pub gene: Option<String>,
    #[serde(default)]
    pub ref_aa: Option<String>,
    #[serde(default)]
    pub alt_aa: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub codon_num: Option<f64>,
    #[serde(default, rename = "type")]
    pub mutation_type: Option<String>,
    /// Lineage the mutation characterizes (characteristic-mutation lookups)
    #[serde(default)]
    pub pangolin_lineage: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub prevalence: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Share of a lineage's sequences carrying the queried mutations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineagePrevalence {
    #[serde(default)]
    pub pangolin_lineage: String,
    #[serde(default)]
    pub lineage_count: Option<u64>,
    #[serde(default)]
    pub mutation_count: Option<u64>,
    #[serde(default)]
    pub proportion: f64,
    #[serde(default)]
    pub proportion_formatted: String,
}

impl GenomicsApi {
    /// Details for a comma-separated mutation list; empty input → empty result
    pub async fn mutation_details(&self, mutations: &str) -> QueryResult<Vec<MutationDetail>> {
        if mutations.trim().is_empty() {
            return Ok(Vec::new());
        }
        let params = QueryParams::new()
            .param("mutations", mutations)
            .timestamp(CacheBucket::Hourly);
        self.client
            .query_as("mutation-details", &params, "/results")
            .await
    }

    /// Lineages carrying the mutations, keeping `proportion >= threshold`
    pub async fn mutations_by_lineage(
        &self,
        mutations: &str,
        proportion_threshold: f64,
    ) -> QueryResult<Vec<LineagePrevalence>> {
        if mutations.trim().is_empty() {
            return Ok(Vec::new());
        }
        let params = QueryParams::new()
            .param("mutations", mutations)
            .timestamp(CacheBucket::Hourly);
        let results: Vec<LineagePrevalence> = self
            .client
            .query_as("mutations-by-lineage", &params, "/results")
            .await?;

        let lineages: Vec<LineagePrevalence> = results
            .into_iter()
            .filter(|d| d.proportion >= proportion_threshold)
            .map(|mut d| {
                d.pangolin_lineage = capitalize(&d.pangolin_lineage);
                d.proportion_formatted = proportion_label(d.proportion);
                d
            })
            .collect();
        debug!(mutations, count = lineages.len(), "Lineages by mutation");
        Ok(lineages)
    }

    /// Mutations found in at least `frequency` of a lineage's sequences
    pub async fn characteristic_mutations(
        &self,
        lineage: &str,
        frequency: f64,
    ) -> QueryResult<Vec<MutationDetail>> {
        let params = QueryParams::new()
            .param("pangolin_lineage", lineage)
            .param("frequency", frequency);
        self.client
            .query_as("lineage-mutations", &params, "/results")
            .await
    }
}
