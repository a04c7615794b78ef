//! Fixed-window request throttling backed by the shared store.
//!
//! Every instance counts against the same `ratelimit:<identity>` counter, so
//! the limit holds across the whole deployment.

mod limiter;
mod middleware;

use std::num::NonZeroU32;

use time::OffsetDateTime;

pub use limiter::FixedWindowLimiter;
pub use middleware::{client_identity, rate_limit_layer, rate_limited_response};

const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_MAX_REQUESTS: u32 = 20;
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: NonZeroU32,
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            max_requests: NonZeroU32::new(DEFAULT_MAX_REQUESTS).unwrap_or(NonZeroU32::MIN),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl From<&crate::config::RateLimitSettings> for RateLimitConfig {
    fn from(settings: &crate::config::RateLimitSettings) -> Self {
        Self {
            window_secs: settings.window_secs.get(),
            max_requests: settings.max_requests,
            key_prefix: settings.key_prefix.clone(),
        }
    }
}

impl RateLimitConfig {
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}{identity}", self.key_prefix)
    }

    pub fn scan_pattern(&self) -> String {
        format!("{}*", self.key_prefix)
    }
}

/// Window state reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: OffsetDateTime,
}

impl RateLimitInfo {
    /// Whole seconds until the window resets, at least one.
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> u64 {
        let secs = (self.reset_at - now).whole_seconds();
        u64::try_from(secs).unwrap_or(0).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `None` when the store failed and the request was let through unmetered.
    Allowed(Option<RateLimitInfo>),
    Limited(RateLimitInfo),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Self::Allowed(info) => info.as_ref(),
            Self::Limited(info) => Some(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[test]
    fn keys_use_prefix() {
        let config = RateLimitConfig::default();
        assert_eq!(config.key_for("10.0.0.1"), "ratelimit:10.0.0.1");
        assert_eq!(config.scan_pattern(), "ratelimit:*");
    }

    #[test]
    fn retry_after_never_drops_below_one_second() {
        let now = OffsetDateTime::now_utc();
        let info = RateLimitInfo {
            limit: 20,
            remaining: 0,
            reset_at: now + Duration::seconds(42),
        };
        assert_eq!(info.retry_after_secs(now), 42);

        let stale = RateLimitInfo {
            reset_at: now - Duration::seconds(3),
            ..info
        };
        assert_eq!(stale.retry_after_secs(now), 1);
    }
}
