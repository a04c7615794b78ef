use std::sync::Arc;

use metrics::counter;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::infra::kv::{KvStore, StoreError};

use super::{Admission, RateLimitConfig, RateLimitInfo};

const METRIC_RATE_LIMIT_ALLOWED_TOTAL: &str = "cachet_rate_limit_allowed_total";
const METRIC_RATE_LIMIT_LIMITED_TOTAL: &str = "cachet_rate_limit_limited_total";
const METRIC_RATE_LIMIT_FAIL_OPEN_TOTAL: &str = "cachet_rate_limit_fail_open_total";

/// Shared-store fixed-window limiter.
///
/// A caller may send up to `max_requests` per window. Counters are created
/// with the window expiry by the first request and are never extended, so a
/// burst of up to twice the limit can straddle a window boundary.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn limit(&self) -> u32 {
        self.config.max_requests.get()
    }

    /// Count one request for `identity` and decide whether it may proceed.
    ///
    /// Store failures admit the request without rate limit information.
    pub async fn check(&self, identity: &str) -> Admission {
        match self.try_check(identity).await {
            Ok(admission) => {
                match admission {
                    Admission::Limited(_) => {
                        counter!(METRIC_RATE_LIMIT_LIMITED_TOTAL).increment(1);
                        debug!(
                            target = "cachet::rate_limit",
                            identity,
                            "Rate limit exceeded"
                        );
                    }
                    Admission::Allowed(_) => {
                        counter!(METRIC_RATE_LIMIT_ALLOWED_TOTAL).increment(1);
                    }
                }
                admission
            }
            Err(err) => {
                counter!(METRIC_RATE_LIMIT_FAIL_OPEN_TOTAL).increment(1);
                warn!(
                    target = "cachet::rate_limit",
                    identity,
                    error = %err,
                    "Rate limiting unavailable, admitting request"
                );
                Admission::Allowed(None)
            }
        }
    }

    async fn try_check(&self, identity: &str) -> Result<Admission, StoreError> {
        let key = self.config.key_for(identity);
        let limit = self.limit();

        let current = parse_count(self.store.get(&key).await?);
        if current >= i64::from(limit) {
            let reset_at = self.reset_at(&key).await?;
            return Ok(Admission::Limited(RateLimitInfo {
                limit,
                remaining: 0,
                reset_at,
            }));
        }

        let count = self.store.increment(&key, self.config.window_secs).await?;
        let reset_at = self.reset_at(&key).await?;

        // Another request may have taken the last slot between the read and the increment.
        if count > i64::from(limit) {
            return Ok(Admission::Limited(RateLimitInfo {
                limit,
                remaining: 0,
                reset_at,
            }));
        }

        let remaining = u32::try_from(i64::from(limit) - count).unwrap_or(0);
        Ok(Admission::Allowed(Some(RateLimitInfo {
            limit,
            remaining,
            reset_at,
        })))
    }

    async fn reset_at(&self, key: &str) -> Result<OffsetDateTime, StoreError> {
        let ttl = self.store.ttl(key).await?;
        let secs = if ttl > 0 {
            ttl
        } else {
            i64::try_from(self.config.window_secs).unwrap_or(i64::MAX)
        };
        Ok(OffsetDateTime::now_utc() + Duration::seconds(secs))
    }
}

/// Counter values that are missing or unreadable count as zero.
fn parse_count(raw: Option<String>) -> i64 {
    raw.and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}
