//! Key-value store client.
//!
//! Everything the cache, the rate limiter and the metrics collector persist
//! lives behind [`KvStore`]. Two adapters exist:
//!
//! - [`RedisStore`]: the production client, lazily connected and shared by
//!   every request handler in the process.
//! - [`MemoryStore`]: an in-process store with the same expiry and atomicity
//!   semantics, used by tests and single-node development.
//!
//! Callers treat every [`StoreError`] as a soft failure.

mod glob;
mod memory;
mod redis_store;

use std::{num::NonZeroU32, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use glob::glob_match;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

const DEFAULT_STORE_URL: &str = "redis://localhost:6379";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(50);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store command `{op}` timed out")]
    Timeout { op: &'static str },
    #[error("store command `{op}` failed: {message}")]
    Command { op: &'static str, message: String },
}

impl StoreError {
    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            op,
            message: message.into(),
        }
    }

    /// True when the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

/// Commands the application issues against the shared key-value store.
///
/// Keys are UTF-8 strings. Cached payloads are JSON text, rate counters are
/// decimal integers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Remove every key in one round trip.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Server-side scan of the keys matching a glob pattern (`*`, `?`, `[..]`).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically increment the counter at `key`.
    ///
    /// A counter created by this call starts at 1 and expires after
    /// `window_secs`. An existing counter keeps its expiry.
    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError>;

    /// Remaining lifetime in seconds; -2 when the key is missing and -1 when it
    /// never expires.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Pipelined multi-get, values in key order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    async fn ping(&self) -> Result<String, StoreError>;

    /// Raw server introspection text (`INFO`).
    async fn server_info(&self) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

/// Connection settings for the store client.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
    pub max_connect_attempts: NonZeroU32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: DEFAULT_STORE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            backoff_step: DEFAULT_BACKOFF_STEP,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_connect_attempts: NonZeroU32::new(DEFAULT_MAX_CONNECT_ATTEMPTS)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl From<&crate::config::StoreSettings> for StoreConfig {
    fn from(settings: &crate::config::StoreSettings) -> Self {
        Self {
            backend: settings.backend,
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout,
            command_timeout: settings.command_timeout,
            backoff_step: settings.backoff_step,
            backoff_cap: settings.backoff_cap,
            max_connect_attempts: settings.max_connect_attempts,
        }
    }
}

impl StoreConfig {
    /// The store URL with any password removed, for logs.
    pub fn redacted_url(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "<invalid url>".to_string(),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `min(attempt * step, cap)`.
pub fn reconnect_delay(attempt: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(attempt).min(cap)
}

/// Build the configured store. No I/O happens until the first command.
pub fn open_store(config: StoreConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::new(config)?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
