//! error.rs - Errors reported by a cache refresh
//!
//! Readers never see these: a failed refresh only bumps the failure counter
//! and leaves the last good snapshot in place.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("data source did not answer within {0:?}")]
    Timeout(Duration),

    #[error("data source unavailable: {0:#}")]
    Source(#[from] anyhow::Error),

    #[error("a refresh is already in progress")]
    AlreadyRefreshing,
}

impl CacheError {
    /// Whether this failure says anything about the remote source
    pub fn is_source_failure(&self) -> bool {
        !matches!(self, CacheError::AlreadyRefreshing)
    }
}
