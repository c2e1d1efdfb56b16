//! Error types for outbreak-data
//!
//! Every leaf query returns `Result<T, QueryError>`. Assemblers catch these at
//! each fan-out member and report them through [`crate::status::Fetched`].

use serde::Serialize;
use thiserror::Error;

/// Query failure taxonomy
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum QueryError {
    /// Network, DNS or timeout failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status (treated as a transport failure by callers)
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Malformed JSON or a payload that does not match the expected types
    #[error("Decode error: {0}")]
    Decode(String),

    /// Response missing expected fields, or zero/multiple matches where one was expected
    #[error("Shape error: {0}")]
    Shape(String),
}

impl QueryError {
    /// True for network-level failures, including non-success status codes
    pub fn is_transport(&self) -> bool {
        matches!(self, QueryError::Transport(_) | QueryError::Status { .. })
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Decode(e.to_string())
    }
}

/// Result type for leaf queries
pub type QueryResult<T> = Result<T, QueryError>;
