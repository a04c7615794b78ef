//! Cache-aside access to the shared store.
//!
//! Every operation converts store failures into a miss or a `false` so the
//! caller can fall through to the source of truth.

use std::{future::Future, sync::Arc};

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

use crate::infra::kv::{KvStore, StoreError};

use super::config::CacheConfig;

const METRIC_CACHE_HIT_TOTAL: &str = "cachet_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "cachet_cache_miss_total";
const METRIC_CACHE_ERROR_TOTAL: &str = "cachet_cache_error_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache TTL must be positive")]
    InvalidTtl,
}

impl CacheError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Serialization(_) => "serialization",
            Self::InvalidTtl => "invalid_ttl",
        }
    }
}

/// Whether a read was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// JSON cache over a [`KvStore`]. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KvStore>,
    config: Arc<CacheConfig>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Cached value for `key`, or `None` on a miss, a store failure or a value
    /// that no longer deserializes.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key, "object").await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                record_error("get", key, &CacheError::from(err));
                None
            }
        }
    }

    /// Store `value` with the default TTL.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set_with_ttl(key, value, self.config.default_ttl_secs)
            .await
    }

    pub async fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, &raw, ttl_secs).await,
            Err(err) => {
                record_error("set", key, &CacheError::from(err));
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.store.delete(key).await {
            Ok(_) => true,
            Err(err) => {
                record_error("delete", key, &CacheError::from(err));
                false
            }
        }
    }

    /// Remove every key matching `pattern` with one scan and one batched delete.
    pub async fn delete_by_pattern(&self, pattern: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.purge(pattern).await {
            Ok(removed) => {
                debug!(
                    target = "cachet::cache",
                    pattern,
                    removed,
                    "Invalidated cache pattern"
                );
                true
            }
            Err(err) => {
                record_error("delete_by_pattern", pattern, &err);
                false
            }
        }
    }

    async fn purge(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys = self.store.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete_many(&keys).await?)
    }

    /// Read-through helper.
    ///
    /// On a miss `fetch` runs and its value is written back with `ttl_secs`.
    /// Errors from `fetch` propagate; cache failures only turn a hit into a miss.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        fetch: F,
    ) -> Result<(T, CacheOutcome), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok((value, CacheOutcome::Hit));
        }

        let value = fetch().await?;
        self.set_with_ttl(key, &value, ttl_secs).await;
        Ok((value, CacheOutcome::Miss))
    }

    /// Raw JSON text for `key`, recording the hit or miss under `layer`.
    pub(crate) async fn get_raw(&self, key: &str, layer: &'static str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(raw)) => {
                counter!(METRIC_CACHE_HIT_TOTAL, "layer" => layer).increment(1);
                Some(raw)
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS_TOTAL, "layer" => layer).increment(1);
                None
            }
            Err(err) => {
                record_error("get", key, &CacheError::from(err));
                counter!(METRIC_CACHE_MISS_TOTAL, "layer" => layer).increment(1);
                None
            }
        }
    }

    pub(crate) async fn set_raw(&self, key: &str, raw: &str, ttl_secs: u64) -> bool {
        if !self.config.enabled {
            return false;
        }
        if ttl_secs == 0 {
            record_error("set", key, &CacheError::InvalidTtl);
            return false;
        }
        match self.store.set_ex(key, raw, ttl_secs).await {
            Ok(()) => true,
            Err(err) => {
                record_error("set", key, &CacheError::from(err));
                false
            }
        }
    }
}

fn record_error(op: &'static str, key: &str, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR_TOTAL, "op" => op, "kind" => err.kind()).increment(1);
    warn!(
        target = "cachet::cache",
        op,
        key,
        error = %err,
        "Cache operation failed"
    );
}
