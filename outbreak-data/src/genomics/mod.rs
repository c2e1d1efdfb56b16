//! Genomics API: lineage and mutation prevalence
//!
//! # Modules
//! - **mutations** - mutation details, lineages carrying a mutation, characteristic mutations
//! - **prevalence** - global, per-location, cumulative and temporal prevalence
//! - **lookup** - name lookups, curated report list, lineage resources
//! - **reports** - page-level assemblers built from the above
//!
//! Leaf operations return `QueryResult<T>`. Assemblers in [`reports`] return
//! [`crate::status::Fetched`] and never fail.

pub mod lookup;
pub mod mutations;
pub mod prevalence;
pub mod reports;

use crate::client::{QueryClient, QueryParams};
use crate::status::GenerationTracker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use lookup::{CuratedEntry, CuratedGroup, LookupEntry};
pub use mutations::{LineagePrevalence, MutationDetail};
pub use prevalence::{
    CumulativePrevalence, DateUpdated, LineageDay, LineageShare, LineagesByDay, LocationPrevalence,
    MostRecentSequence, NewToday, PrevalencePoint,
};
pub use reports::TrackedQuery;

/// Display name of the global pseudo-location
pub const WORLDWIDE: &str = "Worldwide";

/// Granularity of a genomics location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    World,
    Country,
    Division,
}

impl LocationType {
    /// Request parameter naming this granularity (none for the world)
    pub fn param(self) -> Option<&'static str> {
        match self {
            LocationType::World => None,
            LocationType::Country => Some("country"),
            LocationType::Division => Some("division"),
        }
    }
}

impl FromStr for LocationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "world" => Ok(LocationType::World),
            "country" => Ok(LocationType::Country),
            "division" => Ok(LocationType::Division),
            other => Err(format!("Unknown location type: {}", other)),
        }
    }
}

/// A named place at some granularity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LocationType,
}

impl Location {
    pub fn worldwide() -> Self {
        Self {
            name: WORLDWIDE.to_string(),
            kind: LocationType::World,
        }
    }

    pub fn country(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LocationType::Country,
        }
    }

    pub fn division(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LocationType::Division,
        }
    }

    pub fn is_world(&self) -> bool {
        self.kind == LocationType::World || self.name == WORLDWIDE
    }

    /// `<type>=<name>` for non-world locations
    pub fn params(&self) -> QueryParams {
        match self.kind.param() {
            Some(key) if !self.is_world() => QueryParams::new().param(key, &self.name),
            _ => QueryParams::new(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lineage and/or mutation selection sent as `pangolin_lineage=` / `mutations=`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutations: Option<String>,
}

impl GenomicsQuery {
    /// Blank strings count as absent
    pub fn new(lineage: Option<&str>, mutations: Option<&str>) -> Self {
        let clean = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Self {
            lineage: clean(lineage),
            mutations: clean(mutations),
        }
    }

    pub fn lineage(lineage: impl Into<String>) -> Self {
        Self {
            lineage: Some(lineage.into()),
            mutations: None,
        }
    }

    pub fn mutations(mutations: impl Into<String>) -> Self {
        Self {
            lineage: None,
            mutations: Some(mutations.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lineage.is_none() && self.mutations.is_none()
    }

    pub fn params(&self) -> QueryParams {
        QueryParams::new()
            .param_opt("pangolin_lineage", self.lineage.as_deref())
            .param_opt("mutations", self.mutations.as_deref())
    }
}

/// Handle on the genomics backend, the curated report file and lineage resources
#[derive(Clone)]
pub struct GenomicsApi {
    client: QueryClient,
    resources: QueryClient,
    curated_url: String,
    tracker: GenerationTracker,
}

impl GenomicsApi {
    pub fn new(
        client: QueryClient,
        resources: QueryClient,
        curated_url: impl Into<String>,
        tracker: GenerationTracker,
    ) -> Self {
        Self {
            client,
            resources,
            curated_url: curated_url.into(),
            tracker,
        }
    }

    pub fn tracker(&self) -> &GenerationTracker {
        &self.tracker
    }
}
