//! Bounded background cache population.

use std::sync::Arc;

use metrics::counter;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::debug;

use super::store::CacheStore;

const METRIC_CACHE_POPULATION_SKIPPED_TOTAL: &str = "cachet_cache_population_skipped_total";

/// Writes cache entries off the request path.
///
/// At most `population_concurrency` writes are in flight. When every permit
/// is taken the write is dropped rather than queued.
#[derive(Clone)]
pub struct BackgroundWriter {
    cache: CacheStore,
    permits: Arc<Semaphore>,
}

impl BackgroundWriter {
    pub fn new(cache: CacheStore) -> Self {
        let permits = Arc::new(Semaphore::new(cache.config().population_permits()));
        Self { cache, permits }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Spawn a write of `raw` JSON. Returns `None` when the pool is saturated.
    pub fn dispatch(&self, key: String, raw: String, ttl_secs: u64) -> Option<JoinHandle<bool>> {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            counter!(METRIC_CACHE_POPULATION_SKIPPED_TOTAL).increment(1);
            debug!(
                target = "cachet::cache",
                key = %key,
                "Population pool saturated, skipping cache write"
            );
            return None;
        };

        let cache = self.cache.clone();
        Some(tokio::spawn(async move {
            let stored = cache.set_raw(&key, &raw, ttl_secs).await;
            drop(permit);
            stored
        }))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::CacheConfig,
        infra::kv::{KvStore, MemoryStore},
    };

    fn writer(concurrency: usize) -> (Arc<MemoryStore>, BackgroundWriter) {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(
            store.clone(),
            CacheConfig {
                population_concurrency: concurrency,
                ..Default::default()
            },
        );
        (store, BackgroundWriter::new(cache))
    }

    #[tokio::test]
    async fn dispatched_write_lands_in_store() {
        let (store, writer) = writer(4);
        let handle = writer
            .dispatch("blogs:http:/content:x".into(), "[]".into(), 60)
            .expect("permit available");

        assert!(handle.await.expect("join"));
        assert_eq!(
            store.get("blogs:http:/content:x").await.expect("get").as_deref(),
            Some("[]")
        );
        assert_eq!(writer.available_permits(), 4);
    }

    #[tokio::test]
    async fn saturated_pool_skips_writes() {
        let (_store, writer) = writer(1);
        let held = writer.permits.clone().try_acquire_owned().expect("permit");

        assert!(writer.dispatch("k".into(), "1".into(), 60).is_none());

        drop(held);
        assert!(writer.dispatch("k".into(), "1".into(), 60).is_some());
    }
}
