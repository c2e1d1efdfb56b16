//! Test helpers for outbreak-data integration tests
//!
//! - MockTransport: canned JSON, errors and delays routed by URL and parameter
//! - RecordingObserver: captures loading-flag transitions

#![allow(dead_code)]

pub mod mock_transport;
pub mod observer;

pub use mock_transport::{MockTransport, RecordedRequest};
pub use observer::RecordingObserver;

use outbreak_common::config::EndpointConfig;
use outbreak_data::OutbreakApi;
use std::sync::Arc;
use std::time::Duration;

pub const CURATED_URL: &str = "http://curated.test/curated_mutations.json";

pub fn test_config() -> EndpointConfig {
    EndpointConfig {
        epi_url: "http://epi.test/".to_string(),
        genomics_url: "http://genomics.test/".to_string(),
        resources_url: "http://resources.test/".to_string(),
        curated_url: CURATED_URL.to_string(),
        timeout: Duration::from_secs(5),
        log_level: "debug".to_string(),
    }
}

/// API handles over a fresh mock transport and observer
pub fn mock_api() -> (OutbreakApi, Arc<MockTransport>, Arc<RecordingObserver>) {
    let transport = Arc::new(MockTransport::new());
    let observer = Arc::new(RecordingObserver::new());
    let api = OutbreakApi::with_transport(&test_config(), transport.clone(), observer.clone());
    (api, transport, observer)
}
