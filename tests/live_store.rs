//! Live tests against a running Redis.
//!
//! - Marked `#[ignore]`; run with `cargo test -- --ignored`.
//! - Reads the server URL from `CACHET_LIVE_REDIS_URL` (default `redis://127.0.0.1:6379`).
//! - Every key lives under a per-run prefix and is removed afterwards.

use std::{num::NonZeroU32, sync::Arc};

use cachet::{
    cache::{CacheConfig, CacheStore},
    infra::kv::{KvStore, RedisStore, StoreConfig},
    monitor::StoreMonitor,
    rate_limit::{FixedWindowLimiter, RateLimitConfig},
};
use uuid::Uuid;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn live_store() -> TestResult<Arc<RedisStore>> {
    let url = std::env::var("CACHET_LIVE_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store = RedisStore::new(StoreConfig {
        url,
        ..StoreConfig::default()
    })?;
    Ok(Arc::new(store))
}

fn run_prefix() -> String {
    format!("cachet-live-{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn live_commands_round_trip() -> TestResult<()> {
    let store = live_store()?;
    let prefix = run_prefix();

    assert_eq!(store.ping().await?, "PONG");

    let key = format!("{prefix}:plain");
    store.set_ex(&key, "value", 30).await?;
    assert_eq!(store.get(&key).await?.as_deref(), Some("value"));
    let ttl = store.ttl(&key).await?;
    assert!((1..=30).contains(&ttl));

    let counter = format!("{prefix}:counter");
    assert_eq!(store.increment(&counter, 30).await?, 1);
    assert_eq!(store.increment(&counter, 30).await?, 2);

    let keys = store.scan_keys(&format!("{prefix}:*")).await?;
    assert_eq!(keys.len(), 2);
    let values = store.get_many(&keys).await?;
    assert!(values.iter().all(Option::is_some));

    assert_eq!(store.delete_many(&keys).await?, 2);
    assert_eq!(store.ttl(&key).await?, -2);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_cache_pattern_invalidation() -> TestResult<()> {
    let store = live_store()?;
    let prefix = run_prefix();
    let cache = CacheStore::new(store.clone(), CacheConfig::default());

    for id in 0..5 {
        assert!(cache.set(&format!("{prefix}:findById:{id}"), &id).await);
    }
    assert!(cache.set(&format!("{prefix}-other:findById:0"), &0).await);

    assert!(cache.delete_by_pattern(&format!("{prefix}:*")).await);
    assert!(store.scan_keys(&format!("{prefix}:*")).await?.is_empty());
    assert_eq!(
        cache.get::<u32>(&format!("{prefix}-other:findById:0")).await,
        Some(0)
    );

    cache.delete(&format!("{prefix}-other:findById:0")).await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_limiter_and_monitor() -> TestResult<()> {
    let store = live_store()?;
    let config = RateLimitConfig {
        max_requests: NonZeroU32::new(3).ok_or("zero limit")?,
        key_prefix: format!("{}:ratelimit:", run_prefix()),
        ..RateLimitConfig::default()
    };
    let limiter = FixedWindowLimiter::new(store.clone(), config.clone());

    for _ in 0..3 {
        assert!(limiter.check("198.51.100.1").await.is_allowed());
    }
    assert!(!limiter.check("198.51.100.1").await.is_allowed());

    let monitor = StoreMonitor::new(store.clone(), config.clone());
    assert!(monitor.test_connection().await.connected);
    let snapshot = monitor.collect().await.ok_or("metrics unavailable")?;
    assert_eq!(snapshot.rate_limiting.active_ips, 1);
    assert_eq!(snapshot.rate_limiting.blocked_ips, 1);
    assert_eq!(
        monitor.active_identities().await.get("198.51.100.1"),
        Some(&3)
    );

    let keys = store.scan_keys(&config.scan_pattern()).await?;
    store.delete_many(&keys).await?;
    Ok(())
}
