//! Cache configuration.
//!
//! Controls the cache-aside layer via the `[cache]` section of `cachet.toml`.

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_LISTING_TTL_SECS: u64 = 3600;
const DEFAULT_POPULATION_CONCURRENCY: usize = 32;
const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Cache configuration from `cachet.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache-aside layer. When off every read is a miss and writes are skipped.
    pub enabled: bool,
    /// TTL applied when a caller does not pick one.
    pub default_ttl_secs: u64,
    /// TTL for the top-level content listing.
    pub listing_ttl_secs: u64,
    /// Maximum concurrent background cache writes from the response layer.
    pub population_concurrency: usize,
    /// Largest response body the response layer will buffer for caching.
    pub response_body_limit_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
            listing_ttl_secs: DEFAULT_LISTING_TTL_SECS,
            population_concurrency: DEFAULT_POPULATION_CONCURRENCY,
            response_body_limit_bytes: DEFAULT_RESPONSE_BODY_LIMIT_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_secs: settings.default_ttl_secs.get(),
            listing_ttl_secs: settings.listing_ttl_secs.get(),
            population_concurrency: settings.population_concurrency.get() as usize,
            response_body_limit_bytes: settings.response_body_limit_bytes.get() as usize,
        }
    }
}

impl CacheConfig {
    /// Population pool size, never below one.
    pub fn population_permits(&self) -> usize {
        self.population_concurrency.max(1)
    }
}
