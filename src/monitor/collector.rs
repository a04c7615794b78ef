use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tracing::warn;

use crate::{
    infra::kv::{KvStore, StoreError},
    rate_limit::RateLimitConfig,
};

use super::{
    format::format_bytes,
    info::{ServerInfo, hit_rate},
};

const SECONDS_PER_DAY: u64 = 86_400;
const EXPECTED_PING_REPLY: &str = "PONG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub key_count: u64,
    pub memory: MemoryUsage,
    pub uptime: Uptime,
    pub rate_limiting: RateLimitOccupancy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used: String,
    pub peak: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Uptime {
    pub seconds: u64,
    pub days: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOccupancy {
    pub active_ips: u64,
    pub blocked_ips: u64,
}

/// Reads cache and limiter health from the shared store.
#[derive(Clone)]
pub struct StoreMonitor {
    store: Arc<dyn KvStore>,
    rate_limit: RateLimitConfig,
}

impl StoreMonitor {
    pub fn new(store: Arc<dyn KvStore>, rate_limit: RateLimitConfig) -> Self {
        Self { store, rate_limit }
    }

    pub async fn test_connection(&self) -> ConnectionStatus {
        match self.store.ping().await {
            Ok(reply) if reply == EXPECTED_PING_REPLY => ConnectionStatus {
                connected: true,
                message: "Successfully connected to the store".to_string(),
            },
            Ok(reply) => ConnectionStatus {
                connected: false,
                message: format!("Unexpected response from store ping: {reply}"),
            },
            Err(err) => ConnectionStatus {
                connected: false,
                message: format!("Error connecting to the store: {err}"),
            },
        }
    }

    /// Current snapshot, or `None` when the store could not be read.
    pub async fn collect(&self) -> Option<MetricsSnapshot> {
        match self.try_collect().await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(
                    target = "cachet::monitor",
                    error = %err,
                    "Failed to collect store metrics"
                );
                None
            }
        }
    }

    async fn try_collect(&self) -> Result<MetricsSnapshot, StoreError> {
        let info = ServerInfo::parse(&self.store.server_info().await?);
        let counts = self.rate_counts().await?;

        let limit = u64::from(self.rate_limit.max_requests.get());
        let blocked_ips = counts.values().filter(|&&count| count >= limit).count() as u64;

        let hits = info.number("keyspace_hits");
        let misses = info.number("keyspace_misses");
        let uptime_seconds = info.number("uptime_in_seconds");

        Ok(MetricsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            key_count: info.key_count(),
            memory: MemoryUsage {
                used: format_bytes(info.number("used_memory")),
                peak: format_bytes(info.number("used_memory_peak")),
            },
            uptime: Uptime {
                seconds: uptime_seconds,
                days: uptime_seconds / SECONDS_PER_DAY,
            },
            rate_limiting: RateLimitOccupancy {
                active_ips: counts.len() as u64,
                blocked_ips,
            },
        })
    }

    /// Identity (key prefix stripped) to its current request count.
    pub async fn active_identities(&self) -> BTreeMap<String, u64> {
        match self.rate_counts().await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(
                    target = "cachet::monitor",
                    error = %err,
                    "Failed to list rate limited identities"
                );
                BTreeMap::new()
            }
        }
    }

    /// One scan plus one pipelined read of every live counter.
    async fn rate_counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let keys = self
            .store
            .scan_keys(&self.rate_limit.scan_pattern())
            .await?;
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let values = self.store.get_many(&keys).await?;
        let prefix = self.rate_limit.key_prefix.as_str();
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| {
                let value = value?;
                let identity = key.strip_prefix(prefix).unwrap_or(key);
                Some((identity.to_string(), value.trim().parse().unwrap_or(0)))
            })
            .collect())
    }
}
