use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every counter the cache and limiter emit.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachet_cache_hit_total",
            Unit::Count,
            "Total number of shared-cache hits, labelled by layer."
        );
        describe_counter!(
            "cachet_cache_miss_total",
            Unit::Count,
            "Total number of shared-cache misses, labelled by layer."
        );
        describe_counter!(
            "cachet_cache_error_total",
            Unit::Count,
            "Total number of swallowed cache failures, labelled by operation and kind."
        );
        describe_counter!(
            "cachet_cache_population_skipped_total",
            Unit::Count,
            "Total number of response cache writes skipped because the writer pool was saturated."
        );
        describe_counter!(
            "cachet_rate_limit_allowed_total",
            Unit::Count,
            "Total number of requests admitted by the fixed-window limiter."
        );
        describe_counter!(
            "cachet_rate_limit_limited_total",
            Unit::Count,
            "Total number of requests rejected with 429."
        );
        describe_counter!(
            "cachet_rate_limit_fail_open_total",
            Unit::Count,
            "Total number of requests admitted because the store was unavailable."
        );
    });
}
