//! Request status, loading notifications and generation tokens
//!
//! Assemblers never return errors across their boundary. Instead they return
//! a [`Fetched`] value tagged with a [`FetchStatus`], so a caller can tell
//! "empty because nothing matched" from "empty because the call failed".
//!
//! Loading indicators are driven through an explicit [`LoadObserver`]. Each
//! request takes a [`LoadGuard`] from the [`GenerationTracker`] for its UI region;
//! the guard raises the flag when created and lowers it when dropped, on the
//! success and failure paths alike. Guards carry a generation number, and a
//! guard superseded by a newer request for the same region neither lowers
//! the flag nor delivers its value.

use crate::error::QueryError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Loading flag for the similarity view
pub const DATA_LOADING: &str = "dataloading";
/// Loading flag for lineage/mutation reports
pub const REPORT_LOADING: &str = "reportloading";
/// Loading flag for resource searches
pub const RESOURCES_LOADING: &str = "loading";
/// Loading flags for the location report panels
pub const LOCATION_BASIC_LOADING: &str = "locationLoading1";
pub const LOCATION_LINEAGES_LOADING: &str = "locationLoading2";
pub const LOCATION_TABLE_LOADING: &str = "locationLoading3";
pub const LOCATION_TEMPORAL_LOADING: &str = "locationLoading4";
pub const LOCATION_MAPS_LOADING: &str = "locationLoading5";

/// Regions sharing [`REPORT_LOADING`]
pub const REPORT_LIST_REGION: &str = "reportList";
pub const REPORT_DATA_REGION: &str = "reportData";
pub const REPORT_LOCATIONS_REGION: &str = "reportLocations";
pub const LINEAGE_COMPARISON_REGION: &str = "lineageComparison";
pub const SEQUENCING_SUMMARY_REGION: &str = "sequencingSummary";
/// Regions sharing [`RESOURCES_LOADING`]
pub const RESOURCE_SEARCH_REGION: &str = "resourceSearch";
pub const RESOURCE_METADATA_REGION: &str = "resourceMetadata";
pub const CLINICAL_TRIALS_REGION: &str = "clinicalTrials";

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Pending,
    Success,
    Failure,
    /// A newer request for the same region started before this one finished
    Superseded,
}

/// A resolved value plus how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched<T> {
    pub status: FetchStatus,
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl<T> Fetched<T> {
    pub fn success(value: T) -> Self {
        Self {
            status: FetchStatus::Success,
            value,
            error: None,
        }
    }

    /// Failure carrying a degenerate (possibly non-empty) value
    pub fn failure_with(value: T, error: QueryError) -> Self {
        Self {
            status: FetchStatus::Failure,
            value,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            status: self.status,
            value: f(self.value),
            error: self.error,
        }
    }
}

impl<T: Default> Fetched<T> {
    pub fn pending() -> Self {
        Self {
            status: FetchStatus::Pending,
            value: T::default(),
            error: None,
        }
    }

    /// Failure with an empty value
    pub fn failure(error: QueryError) -> Self {
        Self::failure_with(T::default(), error)
    }

    pub fn superseded() -> Self {
        Self {
            status: FetchStatus::Superseded,
            value: T::default(),
            error: None,
        }
    }

    pub fn from_result(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e),
        }
    }
}

impl<T> Fetched<T> {
    /// Status for a settled fan-out
    ///
    /// `Failure` only when every member failed. Otherwise `Success`, with the
    /// first member error (if any) recorded to mark a partial result.
    pub fn from_members(value: T, errors: Vec<Option<QueryError>>) -> Self {
        let all_failed = !errors.is_empty() && errors.iter().all(Option::is_some);
        let first = errors.into_iter().flatten().next();
        match first {
            Some(error) if all_failed => Self::failure_with(value, error),
            error => Self {
                status: FetchStatus::Success,
                value,
                error,
            },
        }
    }

    /// True when the value is complete and no member failed
    pub fn is_complete(&self) -> bool {
        self.status == FetchStatus::Success && self.error.is_none()
    }
}

/// Receives loading-flag transitions for named UI regions
pub trait LoadObserver: Send + Sync {
    fn loading_changed(&self, key: &str, loading: bool);
}

impl<F> LoadObserver for F
where
    F: Fn(&str, bool) + Send + Sync,
{
    fn loading_changed(&self, key: &str, loading: bool) {
        self(key, loading)
    }
}

/// Observer that ignores every transition
pub struct NoopObserver;

impl LoadObserver for NoopObserver {
    fn loading_changed(&self, _key: &str, _loading: bool) {}
}

/// Hands out generation-stamped [`LoadGuard`]s per UI region
///
/// A region names one view; a flag names the loading indicator it drives.
/// Several regions may share a flag, which stays raised while any of them
/// has a current request in flight.
#[derive(Clone)]
pub struct GenerationTracker {
    observer: Arc<dyn LoadObserver>,
    state: Arc<Mutex<TrackerState>>,
}

#[derive(Default)]
struct TrackerState {
    generations: HashMap<String, u64>,
    active: HashSet<String>,
    in_flight: HashMap<String, usize>,
}

impl GenerationTracker {
    pub fn new(observer: Arc<dyn LoadObserver>) -> Self {
        Self {
            observer,
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Tracker with no observer
    pub fn silent() -> Self {
        Self::new(Arc::new(NoopObserver))
    }

    /// Start a request for a region whose flag has the same name
    pub fn begin(&self, key: &str) -> LoadGuard {
        self.begin_region(key, key)
    }

    /// Start a request for `region`: bump its generation and raise `flag`
    pub fn begin_region(&self, region: &str, flag: &str) -> LoadGuard {
        let generation = {
            let mut state = self.lock();
            let entry = state.generations.entry(region.to_string()).or_insert(0);
            *entry += 1;
            let generation = *entry;
            // A newer request in a busy region takes over the older one's slot
            if state.active.insert(region.to_string()) {
                *state.in_flight.entry(flag.to_string()).or_insert(0) += 1;
            }
            generation
        };
        debug!(region, flag, generation, "Request started");
        self.observer.loading_changed(flag, true);
        LoadGuard {
            tracker: self.clone(),
            region: region.to_string(),
            flag: flag.to_string(),
            generation,
        }
    }

    /// Latest generation issued for `region` (0 if none)
    pub fn current(&self, region: &str) -> u64 {
        self.lock().generations.get(region).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Retire a current request; true when its flag has nothing left in flight
    fn release(&self, region: &str, flag: &str, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generations.get(region).copied() != Some(generation) {
            return false;
        }
        state.active.remove(region);
        let remaining = state
            .in_flight
            .get_mut(flag)
            .map(|count| {
                *count = count.saturating_sub(1);
                *count
            })
            .unwrap_or(0);
        if remaining == 0 {
            state.in_flight.remove(flag);
        }
        remaining == 0
    }
}

impl Default for GenerationTracker {
    fn default() -> Self {
        Self::silent()
    }
}

/// In-flight request for one region; lowers the loading flag on drop
pub struct LoadGuard {
    tracker: GenerationTracker,
    region: String,
    flag: String,
    generation: u64,
}

impl LoadGuard {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while no newer request for the same region has started
    pub fn is_current(&self) -> bool {
        self.tracker.current(&self.region) == self.generation
    }

    /// Deliver a result, discarding it when this request has been superseded
    pub fn finish<T: Default>(self, result: Fetched<T>) -> Fetched<T> {
        if self.is_current() {
            result
        } else {
            debug!(
                region = %self.region,
                generation = self.generation,
                "Discarding superseded result"
            );
            Fetched::superseded()
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if self.tracker.release(&self.region, &self.flag, self.generation) {
            self.tracker.observer.loading_changed(&self.flag, false);
        }
    }
}
