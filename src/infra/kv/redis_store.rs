use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, RedisResult, aio::MultiplexedConnection};
use tokio::{
    sync::{Mutex, RwLock},
    time::{Instant, sleep, timeout},
};
use tracing::{error, info, warn};

use super::{KvStore, StoreConfig, StoreError, reconnect_delay};

const SCAN_COUNT: u64 = 500;

/// Redis-backed store.
///
/// The multiplexed connection is opened by the first command and then shared
/// by every caller. Connection-level failures drop the handle so the next
/// command reconnects.
///
/// Only one caller runs the reconnect cycle. Callers that queued behind a
/// failed cycle, or that arrive within `backoff_cap` of it, fail immediately.
pub struct RedisStore {
    client: Client,
    config: StoreConfig,
    connection: RwLock<Option<MultiplexedConnection>>,
    connect_guard: Mutex<()>,
    failed_cycles: AtomicU64,
    last_failure: RwLock<Option<Instant>>,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|err| StoreError::Connection(format!("invalid store url: {err}")))?;

        Ok(Self {
            client,
            config,
            connection: RwLock::new(None),
            connect_guard: Mutex::new(()),
            failed_cycles: AtomicU64::new(0),
            last_failure: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let seen_failures = self.failed_cycles.load(Ordering::Acquire);
        self.check_cooldown().await?;

        let _guard = self.connect_guard.lock().await;
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }
        if self.failed_cycles.load(Ordering::Acquire) != seen_failures {
            return Err(StoreError::Connection(
                "store unreachable; reconnect failed while waiting".to_string(),
            ));
        }

        match self.connect_with_backoff().await {
            Ok(conn) => {
                *self.last_failure.write().await = None;
                *self.connection.write().await = Some(conn.clone());
                Ok(conn)
            }
            Err(err) => {
                *self.last_failure.write().await = Some(Instant::now());
                self.failed_cycles.fetch_add(1, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn check_cooldown(&self) -> Result<(), StoreError> {
        let cooling = self
            .last_failure
            .read()
            .await
            .is_some_and(|at| at.elapsed() < self.config.backoff_cap);
        if cooling {
            return Err(StoreError::Connection(
                "store unreachable; waiting before the next reconnect".to_string(),
            ));
        }
        Ok(())
    }

    async fn connect_with_backoff(&self) -> Result<MultiplexedConnection, StoreError> {
        let attempts = self.config.max_connect_attempts.get();
        let url = self.config.redacted_url();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = timeout(
                self.config.connect_timeout,
                self.client.get_multiplexed_async_connection(),
            )
            .await;

            match outcome {
                Ok(Ok(conn)) => {
                    info!(
                        target = "cachet::kv",
                        url = %url,
                        attempt,
                        "Connected to store"
                    );
                    return Ok(conn);
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => {
                    last_error = format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    )
                }
            }

            if attempt < attempts {
                let delay =
                    reconnect_delay(attempt, self.config.backoff_step, self.config.backoff_cap);
                warn!(
                    target = "cachet::kv",
                    url = %url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Store connection failed, reconnecting"
                );
                sleep(delay).await;
            }
        }

        error!(
            target = "cachet::kv",
            url = %url,
            attempts,
            error = %last_error,
            "Store unreachable"
        );
        Err(StoreError::Connection(last_error))
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }

    async fn command_failed(&self, op: &'static str, err: RedisError) -> StoreError {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            warn!(
                target = "cachet::kv",
                op,
                error = %err,
                "Store connection lost; next command reconnects"
            );
            self.reset_connection().await;
            return StoreError::Connection(err.to_string());
        }

        StoreError::command(op, err.to_string())
    }

    async fn exec<T, F, Fut>(&self, op: &'static str, command: F) -> Result<T, StoreError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let conn = self.connection().await?;
        match timeout(self.config.command_timeout, command(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.command_failed(op, err).await),
            Err(_) => {
                self.reset_connection().await;
                Err(StoreError::Timeout { op })
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.exec("GET", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.exec("SET", |mut conn| async move {
            conn.set_ex(key, value, ttl_secs).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.exec("DEL", |mut conn| async move { conn.del(key).await })
            .await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.exec("DEL", |mut conn| async move { conn.del(keys).await })
            .await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.exec("SCAN", |mut conn| async move {
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(page);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may report a key more than once while the keyspace rehashes.
            keys.sort();
            keys.dedup();
            Ok::<_, RedisError>(keys)
        })
        .await
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError> {
        self.exec("INCR", |mut conn| async move {
            let (count,): (i64,) = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(key)
                .arg(0)
                .arg("EX")
                .arg(window_secs)
                .arg("NX")
                .ignore()
                .cmd("INCR")
                .arg(key)
                .query_async(&mut conn)
                .await?;
            Ok::<_, RedisError>(count)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.exec("TTL", |mut conn| async move { conn.ttl(key).await })
            .await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.exec("GET", |mut conn| async move {
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.get(key);
            }
            let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
            Ok::<_, RedisError>(values)
        })
        .await
    }

    async fn ping(&self) -> Result<String, StoreError> {
        self.exec("PING", |mut conn| async move {
            let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, RedisError>(reply)
        })
        .await
    }

    async fn server_info(&self) -> Result<String, StoreError> {
        self.exec("INFO", |mut conn| async move {
            let info: String = redis::cmd("INFO").query_async(&mut conn).await?;
            Ok::<_, RedisError>(info)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU32, sync::Arc, time::Duration};

    use super::*;

    // Port 1 on loopback refuses connections immediately.
    fn refused_store(step_ms: u64, attempts: u32) -> RedisStore {
        let config = StoreConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(50),
            backoff_step: Duration::from_millis(step_ms),
            backoff_cap: Duration::from_millis(step_ms),
            max_connect_attempts: NonZeroU32::new(attempts).expect("non-zero"),
            ..Default::default()
        };
        RedisStore::new(config).expect("client")
    }

    #[test]
    fn rejects_malformed_url() {
        let config = StoreConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_connection_error() {
        let store = refused_store(1, 2);

        let err = store.get("anything").await.expect_err("no server");
        assert!(err.is_unavailable());
        assert!(store.connection.read().await.is_none());
        assert_eq!(store.failed_cycles.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_reconnect_cycle() {
        // Three attempts sleep 100ms twice, so one cycle takes about 200ms.
        let store = Arc::new(refused_store(100, 3));
        let cycle = Duration::from_millis(200);

        let callers = (0..6).map(|_| {
            let store = store.clone();
            async move {
                let started = std::time::Instant::now();
                let result = store.get("anything").await;
                (result, started.elapsed())
            }
        });
        let outcomes = futures::future::join_all(callers).await;

        let slowest = outcomes
            .iter()
            .map(|(_, elapsed)| *elapsed)
            .max()
            .expect("callers");
        assert!(
            slowest < cycle * 3,
            "slowest caller waited {slowest:?}, callers were serialized"
        );
        for (result, _) in &outcomes {
            assert!(result.as_ref().expect_err("no server").is_unavailable());
        }
        assert_eq!(store.failed_cycles.load(Ordering::Acquire), 1);

        // Inside the cooldown no new cycle starts.
        let started = std::time::Instant::now();
        assert!(store.ping().await.is_err());
        assert!(started.elapsed() < cycle);
        assert_eq!(store.failed_cycles.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn reconnects_again_after_the_cooldown() {
        let store = refused_store(20, 2);

        assert!(store.get("anything").await.is_err());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("anything").await.is_err());
        assert_eq!(store.failed_cycles.load(Ordering::Acquire), 2);
    }
}
