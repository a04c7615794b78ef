use std::{
    fmt::Write as _,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{KvStore, StoreError, glob_match};

/// Writes between full sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    fn footprint(key: &str, value: &str) -> u64 {
        (key.len() + value.len()) as u64
    }
}

/// In-process [`KvStore`].
///
/// Expiry follows tokio's clock, so tests can drive TTLs with a paused
/// runtime. Per-key entry locks make [`KvStore::increment`] atomic.
///
/// Expired entries are dropped on lookup, on every scan and by a sweep that
/// runs every [`SWEEP_EVERY`] writes.
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    used_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    writes: AtomicU64,
    offline: AtomicBool,
    started_at: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            used_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Make every command fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<String> {
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());

        match value {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                let expired = self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                if let Some((key, entry)) = expired {
                    self.release(MemoryEntry::footprint(&key, &entry.value));
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn remove_live(&self, key: &str, now: Instant) -> u64 {
        match self.entries.remove(key) {
            Some((key, entry)) => {
                self.release(MemoryEntry::footprint(&key, &entry.value));
                u64::from(entry.is_live(now))
            }
            None => 0,
        }
    }

    /// Charge bytes before the entry becomes visible, so a concurrent removal
    /// can never release them first.
    fn charge(&self, bytes: u64) {
        let used = self.used_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak_bytes.fetch_max(used, Ordering::Relaxed);
    }

    fn release(&self, bytes: u64) {
        self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn sweep(&self, now: Instant) {
        self.entries.retain(|key, entry| {
            let live = entry.is_live(now);
            if !live {
                self.release(MemoryEntry::footprint(key, &entry.value));
            }
            live
        });
    }

    fn after_write(&self, now: Instant) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }
    }

    fn live_entries(&self, now: Instant) -> (u64, u64) {
        let mut keys = 0;
        let mut expiring = 0;
        for entry in self.entries.iter() {
            if !entry.is_live(now) {
                continue;
            }
            keys += 1;
            if entry.expires_at.is_some() {
                expiring += 1;
            }
        }
        (keys, expiring)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_online()?;
        Ok(self.lookup(key, Instant::now()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.ensure_online()?;
        if ttl_secs == 0 {
            return Err(StoreError::command("SET", "invalid expire time"));
        }
        let now = Instant::now();
        self.charge(MemoryEntry::footprint(key, value));
        let replaced = self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );
        if let Some(old) = replaced {
            self.release(MemoryEntry::footprint(key, &old.value));
        }
        self.after_write(now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_online()?;
        Ok(self.remove_live(key, Instant::now()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(keys.iter().map(|key| self.remove_live(key, now)).sum())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        self.sweep(now);
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_live(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let fresh = || MemoryEntry {
            value: "0".to_string(),
            expires_at: Some(now + Duration::from_secs(window_secs)),
        };

        let next = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
                self.charge(MemoryEntry::footprint(key, "0"));
                fresh()
            });
            let before = MemoryEntry::footprint(key, &entry.value);
            if !entry.is_live(now) {
                *entry = fresh();
            }
            let current: i64 = entry.value.parse().map_err(|_| {
                StoreError::command("INCR", "value is not an integer or out of range")
            })?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| StoreError::command("INCR", "increment would overflow"))?;
            entry.value = next.to_string();

            let after = MemoryEntry::footprint(key, &entry.value);
            if after >= before {
                self.charge(after - before);
            } else {
                self.release(before - after);
            }
            next
        };

        self.after_write(now);
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let ttl = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => {
                    let remaining = at.saturating_duration_since(now).as_millis();
                    ((remaining + 500) / 1000) as i64
                }
                None => -1,
            },
            _ => -2,
        };
        Ok(ttl)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(keys.iter().map(|key| self.lookup(key, now)).collect())
    }

    async fn ping(&self) -> Result<String, StoreError> {
        self.ensure_online()?;
        Ok("PONG".to_string())
    }

    async fn server_info(&self) -> Result<String, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        self.sweep(now);
        let (keys, expiring) = self.live_entries(now);
        let bytes = self.used_bytes.load(Ordering::Acquire);
        let peak = self.peak_bytes.load(Ordering::Relaxed).max(bytes);
        let uptime = now.saturating_duration_since(self.started_at).as_secs();

        let mut info = String::new();
        let _ = write!(
            info,
            "# Server\r\nredis_mode:standalone\r\nuptime_in_seconds:{uptime}\r\nuptime_in_days:{}\r\n\r\n",
            uptime / 86_400
        );
        let _ = write!(
            info,
            "# Memory\r\nused_memory:{bytes}\r\nused_memory_peak:{peak}\r\n\r\n"
        );
        let _ = write!(
            info,
            "# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n\r\n",
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed)
        );
        info.push_str("# Keyspace\r\n");
        if keys > 0 {
            let _ = write!(info, "db0:keys={keys},expires={expiring},avg_ttl=0\r\n");
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_get_then_expire() {
        let store = MemoryStore::new();
        store.set_ex("blogs:find:abc", "[1,2]", 5).await.expect("set");

        assert_eq!(
            store.get("blogs:find:abc").await.expect("get").as_deref(),
            Some("[1,2]")
        );
        assert_eq!(store.ttl("blogs:find:abc").await.expect("ttl"), 5);

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.get("blogs:find:abc").await.expect("get"), None);
        assert_eq!(store.ttl("blogs:find:abc").await.expect("ttl"), -2);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_creates_window_and_keeps_expiry() {
        let store = MemoryStore::new();

        assert_eq!(store.increment("ratelimit:a", 60).await.expect("incr"), 1);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.increment("ratelimit:a", 60).await.expect("incr"), 2);
        assert_eq!(store.ttl("ratelimit:a").await.expect("ttl"), 40);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(store.increment("ratelimit:a", 60).await.expect("incr"), 1);
        assert_eq!(store.ttl("ratelimit:a").await.expect("ttl"), 60);
    }

    #[tokio::test]
    async fn increment_rejects_non_integer_values() {
        let store = MemoryStore::new();
        store.set_ex("k", "{\"a\":1}", 60).await.expect("set");
        let err = store.increment("k", 60).await.expect_err("not an integer");
        assert!(matches!(err, StoreError::Command { op: "INCR", .. }));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("ratelimit:burst", 60).await
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.expect("join").expect("incr"));
        }
        seen.sort();
        assert_eq!(seen, (1..=64).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn scan_and_delete_many() {
        let store = MemoryStore::new();
        for key in ["blogs:find:1", "blogs:findById:2", "users:find:1"] {
            store.set_ex(key, "1", 60).await.expect("set");
        }

        let keys = store.scan_keys("blogs:*").await.expect("scan");
        assert_eq!(keys, vec!["blogs:find:1", "blogs:findById:2"]);

        assert_eq!(store.delete_many(&keys).await.expect("del"), 2);
        assert_eq!(store.scan_keys("*").await.expect("scan"), vec!["users:find:1"]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_command() {
        let store = MemoryStore::new();
        store.set_offline(true);

        assert!(store.ping().await.expect_err("offline").is_unavailable());
        assert!(store.get("k").await.is_err());
        assert!(store.increment("k", 60).await.is_err());

        store.set_offline(false);
        assert_eq!(store.ping().await.expect("online"), "PONG");
    }

    #[tokio::test(start_paused = true)]
    async fn scans_reclaim_expired_entries() {
        let store = MemoryStore::new();
        for n in 0..1000 {
            store
                .increment(&format!("ratelimit:10.0.{}.{}", n / 256, n % 256), 60)
                .await
                .expect("incr");
        }
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert!(store.scan_keys("ratelimit:*").await.expect("scan").is_empty());
        assert_eq!(store.entries.len(), 0);
        assert_eq!(store.used_bytes.load(Ordering::Acquire), 0);

        store.set_ex("blogs:find:1", "[]", 60).await.expect("set");
        assert_eq!(store.entries.len(), 1);
        assert_eq!(
            store.used_bytes.load(Ordering::Acquire),
            MemoryEntry::footprint("blogs:find:1", "[]")
        );
        let info = store.server_info().await.expect("info");
        assert!(info.contains("db0:keys=1,expires=1,avg_ttl=0\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries_without_scans() {
        let store = MemoryStore::new();
        for n in 0..100 {
            store.set_ex(&format!("old:{n}"), "x", 1).await.expect("set");
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        for _ in 0..SWEEP_EVERY {
            store.increment("ratelimit:hot", 60).await.expect("incr");
        }
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn used_bytes_track_overwrites_and_deletes() {
        let store = MemoryStore::new();
        store.set_ex("k", "short", 60).await.expect("set");
        store.set_ex("k", "a longer value", 60).await.expect("set");
        assert_eq!(
            store.used_bytes.load(Ordering::Acquire),
            MemoryEntry::footprint("k", "a longer value")
        );

        for _ in 0..10 {
            store.increment("n", 60).await.expect("incr");
        }
        assert_eq!(
            store.used_bytes.load(Ordering::Acquire),
            MemoryEntry::footprint("k", "a longer value") + MemoryEntry::footprint("n", "10")
        );

        store.delete("k").await.expect("del");
        store.delete("n").await.expect("del");
        assert_eq!(store.used_bytes.load(Ordering::Acquire), 0);
        let peak = store.peak_bytes.load(Ordering::Acquire);
        assert!(peak >= MemoryEntry::footprint("k", "a longer value"));
    }

    #[tokio::test]
    async fn info_reports_keyspace_and_stats() {
        let store = MemoryStore::new();
        store.set_ex("a", "1", 60).await.expect("set");
        let _ = store.get("a").await.expect("hit");
        let _ = store.get("missing").await.expect("miss");

        let info = store.server_info().await.expect("info");
        assert!(info.contains("keyspace_hits:1\r\n"));
        assert!(info.contains("keyspace_misses:1\r\n"));
        assert!(info.contains("db0:keys=1,expires=1,avg_ttl=0\r\n"));
    }
}
