//! Engine configuration
//!
//! Loaded from JSON via serde, or from environment variables:
//!
//! - `PERMISSIONS_CACHE_ENABLED` - `true`/`false` (default: true)
//! - `PERMISSIONS_CACHE_CAPACITY` - max cached resolutions (default: 10000)
//! - `PERMISSIONS_CACHE_INVALIDATION` - `global` or `scoped` (default: global)
//! - `PERMISSIONS_METRICS_ENABLED` - `true`/`false` (default: true)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::cache::{CacheConfig, InvalidationMode};
use crate::error::{AuthzError, Result};

pub const ENV_CACHE_ENABLED: &str = "PERMISSIONS_CACHE_ENABLED";
pub const ENV_CACHE_CAPACITY: &str = "PERMISSIONS_CACHE_CAPACITY";
pub const ENV_CACHE_INVALIDATION: &str = "PERMISSIONS_CACHE_INVALIDATION";
pub const ENV_METRICS_ENABLED: &str = "PERMISSIONS_METRICS_ENABLED";

/// Permission engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Memoize resolutions behind the epoch clock
    pub enable_cache: bool,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache: CacheConfig::default(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `PERMISSIONS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CACHE_ENABLED) {
            config.enable_cache = parse_bool(ENV_CACHE_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_CAPACITY) {
            config.cache.capacity = raw.trim().parse().map_err(|_| {
                AuthzError::InvalidArgument(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_CACHE_CAPACITY, raw
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_CACHE_INVALIDATION) {
            config.cache.invalidation = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_METRICS_ENABLED) {
            config.enable_metrics = parse_bool(ENV_METRICS_ENABLED, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.enable_cache && self.cache.capacity == 0 {
            return Err(AuthzError::InvalidArgument(
                "cache capacity must be greater than zero when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for InvalidationMode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "scoped" => Ok(Self::Scoped),
            other => Err(AuthzError::InvalidArgument(format!(
                "invalid invalidation mode '{}', expected global|scoped",
                other
            ))),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AuthzError::InvalidArgument(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}
