//! Store smoke test behind `cachet selftest`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::CacheStore;

const PROBE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Probe {
    id: u32,
    name: String,
    stamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStep {
    pub name: &'static str,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelftestReport {
    pub steps: Vec<ProbeStep>,
}

impl SelftestReport {
    pub fn passed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|step| step.passed)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps
            .iter()
            .filter(|step| !step.passed)
            .map(|step| step.name)
    }

    fn record(&mut self, name: &'static str, passed: bool) {
        self.steps.push(ProbeStep { name, passed });
    }
}

/// Write, read back, pattern-delete and delete probe entries under `prefix`.
///
/// Every step runs even when an earlier one fails, so the report shows the
/// full picture.
pub async fn run_selftest(cache: &CacheStore, prefix: &str) -> SelftestReport {
    let mut report = SelftestReport::default();
    let key = format!("{prefix}:key");
    let probe = Probe {
        id: 1,
        name: "cachet probe".to_string(),
        stamp: OffsetDateTime::now_utc().unix_timestamp(),
    };

    report.record(
        "set",
        cache.set_with_ttl(&key, &probe, PROBE_TTL_SECS).await,
    );
    report.record(
        "get",
        cache.get::<Probe>(&key).await.as_ref() == Some(&probe),
    );

    let pattern_keys = [format!("{prefix}:pattern:1"), format!("{prefix}:pattern:2")];
    let mut seeded = true;
    for (index, pattern_key) in pattern_keys.iter().enumerate() {
        seeded &= cache
            .set_with_ttl(pattern_key, &index, PROBE_TTL_SECS)
            .await;
    }
    let pattern_deleted = seeded
        && cache.delete_by_pattern(&format!("{prefix}:pattern:*")).await
        && cache.get::<usize>(&pattern_keys[0]).await.is_none()
        && cache.get::<usize>(&pattern_keys[1]).await.is_none();
    report.record("delete_by_pattern", pattern_deleted);

    let deleted = cache.delete(&key).await && cache.get::<Probe>(&key).await.is_none();
    report.record("delete", deleted);

    report
}
