//! Engine configuration.
//!
//! Settings are layered with `figment`, lowest priority first:
//!
//! 1. built-in defaults
//! 2. `cacheme.toml` in the working directory (if present)
//! 3. `CACHEME_*` environment variables (`CACHEME_PREFIX=APP`)

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::pattern::{DEFAULT_BATCH_SIZE, DEFAULT_SCAN_COUNT};

/// File read by [`CacheMeConfig::load`].
pub const CONFIG_FILE: &str = "cacheme.toml";

/// Prefix of the environment variables read by [`CacheMeConfig::load`].
pub const ENV_PREFIX: &str = "CACHEME_";

/// What a cached call does when the store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// Return the store error to the caller.
    #[default]
    Propagate,
    /// Log a warning and return the computed result uncached.
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMeConfig {
    /// When `false` every cached call runs its computation directly.
    pub enabled: bool,
    /// Prefix of every key the engine writes.
    pub prefix: String,
    /// Keys examined per page during pattern invalidation.
    pub scan_count: usize,
    /// Keys deleted per batch during pattern invalidation.
    pub delete_batch_size: usize,
    pub on_store_error: StoreErrorPolicy,
    /// Expiry, refreshed on every link, of the invalidation index sets.
    /// Unset means the index grows without bound.
    pub index_ttl_secs: Option<u64>,
    /// Redis connection string. Used only with the `redis` feature.
    pub redis_url: Option<String>,
}

impl Default for CacheMeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "CM".to_string(),
            scan_count: DEFAULT_SCAN_COUNT,
            delete_batch_size: DEFAULT_BATCH_SIZE,
            on_store_error: StoreErrorPolicy::Propagate,
            index_ttl_secs: None,
            redis_url: None,
        }
    }
}

impl CacheMeConfig {
    /// Loads defaults, then [`CONFIG_FILE`], then `CACHEME_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`load`](Self::load) with an explicit configuration file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if path.as_ref().exists() {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|err| CacheError::Config(Box::new(err)))
    }

    pub fn index_ttl(&self) -> Option<Duration> {
        self.index_ttl_secs.map(Duration::from_secs)
    }
}
