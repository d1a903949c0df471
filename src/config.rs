//! config.rs - Runtime configuration loaded from TOML
//!
//! Every field has a default, so an empty file (or no file) is valid.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which data source implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Http,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            kind: SourceKind::Http,
            base_url: "http://localhost:8080/api/market".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub refresh_interval_secs: u64,
    pub staleness_threshold_secs: i64,
    pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            refresh_interval_secs: 300,
            staleness_threshold_secs: 900,
            fetch_timeout_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Snapshot age past which the cache reports stale, clamped to the
    /// representable range
    pub fn staleness_threshold(&self) -> ChronoDuration {
        let secs = self.staleness_threshold_secs;
        ChronoDuration::try_seconds(secs).unwrap_or(if secs < 0 {
            ChronoDuration::MIN
        } else {
            ChronoDuration::MAX
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub max_routes: usize,
    /// Budget in currency
    pub budget: Decimal,
    pub chain_legs: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        RouteConfig {
            max_routes: 10,
            budget: Decimal::from(100_000_000),
            chain_legs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub routes: RouteConfig,
}

impl MarketConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
