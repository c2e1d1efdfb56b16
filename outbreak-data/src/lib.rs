//! # outbreak-data
//!
//! Data-access layer for the outbreak.info search APIs:
//! - **similarity** - epidemiological peers of a location (`EpiApi`)
//! - **genomics** - lineage/mutation prevalence and report assemblers (`GenomicsApi`)
//! - **resources** - research-resource search, facets and summaries (`ResourcesApi`)
//!
//! Leaf queries return `QueryResult<T>`; page-level assemblers return
//! [`status::Fetched`] and never fail. Loading flags for UI regions are
//! reported through a [`status::LoadObserver`].

pub mod aggregate;
pub mod client;
pub mod error;
pub mod genomics;
pub mod normalize;
pub mod query;
pub mod resources;
pub mod similarity;
pub mod status;

pub use client::{HttpTransport, QueryClient, QueryParams, SearchTransport};
pub use error::{QueryError, QueryResult};
pub use genomics::{GenomicsApi, GenomicsQuery, Location, LocationType};
pub use query::{AdminLevel, Query};
pub use resources::ResourcesApi;
pub use similarity::{EpiApi, SimilarityReport};
pub use status::{FetchStatus, Fetched, GenerationTracker, LoadObserver, NoopObserver};

use outbreak_common::config::EndpointConfig;
use std::sync::Arc;
use tracing::info;

/// All three API handles sharing one transport and one loading tracker
#[derive(Clone)]
pub struct OutbreakApi {
    pub epi: EpiApi,
    pub genomics: GenomicsApi,
    pub resources: ResourcesApi,
}

impl OutbreakApi {
    /// Build HTTP-backed handles from resolved endpoint settings
    pub fn from_config(config: &EndpointConfig, observer: Arc<dyn LoadObserver>) -> QueryResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.timeout)?);
        info!(
            epi = %config.epi_url,
            genomics = %config.genomics_url,
            resources = %config.resources_url,
            timeout_secs = config.timeout.as_secs(),
            "Configured search endpoints"
        );
        Ok(Self::with_transport(config, transport, observer))
    }

    /// Build handles over any transport
    pub fn with_transport(
        config: &EndpointConfig,
        transport: Arc<dyn SearchTransport>,
        observer: Arc<dyn LoadObserver>,
    ) -> Self {
        let tracker = GenerationTracker::new(observer);
        let epi = QueryClient::new(config.epi_url.clone(), transport.clone());
        let genomics = QueryClient::new(config.genomics_url.clone(), transport.clone());
        let resources = QueryClient::new(config.resources_url.clone(), transport);

        Self {
            epi: EpiApi::new(epi, tracker.clone()),
            genomics: GenomicsApi::new(genomics, resources.clone(), config.curated_url.clone(), tracker.clone()),
            resources: ResourcesApi::new(resources, tracker),
        }
    }
}
