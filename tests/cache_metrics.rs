use std::{collections::HashSet, num::NonZeroU32, sync::Arc};

use cachet::{
    cache::{BackgroundWriter, CacheConfig, CacheStore},
    infra::{kv::MemoryStore, telemetry},
    rate_limit::{FixedWindowLimiter, RateLimitConfig},
};
use metrics_util::debugging::DebuggingRecorder;

#[tokio::test]
async fn cache_and_limiter_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let store = Arc::new(MemoryStore::new());
    let cache = CacheStore::new(
        store.clone(),
        CacheConfig {
            population_concurrency: 1,
            ..CacheConfig::default()
        },
    );

    // miss, then hit
    assert!(cache.get::<u32>("blogs:findById:1").await.is_none());
    assert!(cache.set("blogs:findById:1", &7_u32).await);
    assert_eq!(cache.get::<u32>("blogs:findById:1").await, Some(7));

    // saturated writer pool
    let writer = BackgroundWriter::new(cache.clone());
    let first = writer.dispatch("blogs:http:/a".into(), "{}".into(), 60);
    let second = writer.dispatch("blogs:http:/b".into(), "{}".into(), 60);
    assert!(first.is_some());
    assert!(second.is_none());
    if let Some(handle) = first {
        handle.await.expect("writer task");
    }

    let limiter = FixedWindowLimiter::new(
        store.clone(),
        RateLimitConfig {
            max_requests: NonZeroU32::MIN,
            ..RateLimitConfig::default()
        },
    );
    assert!(limiter.check("203.0.113.9").await.is_allowed());
    assert!(!limiter.check("203.0.113.9").await.is_allowed());

    // store failures: swallowed cache error and fail-open admission
    store.set_offline(true);
    assert!(cache.get::<u32>("blogs:findById:1").await.is_none());
    assert!(limiter.check("203.0.113.10").await.is_allowed());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "cachet_cache_hit_total",
        "cachet_cache_miss_total",
        "cachet_cache_error_total",
        "cachet_cache_population_skipped_total",
        "cachet_rate_limit_allowed_total",
        "cachet_rate_limit_limited_total",
        "cachet_rate_limit_fail_open_total",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
