//! # Outbreak Common Library
//!
//! Shared code for the outbreak data-access crates including:
//! - Common error type
//! - Endpoint and logging configuration resolution
//! - Time helpers (cache-busting buckets, calendar-day differences)

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
