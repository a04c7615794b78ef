//! Parsing of the store's `INFO` text.

use std::collections::HashMap;

/// `field:value` pairs from an `INFO` reply. Section headers, blank lines and
/// lines whose value itself contains `:` are skipped.
#[derive(Debug, Default, Clone)]
pub struct ServerInfo {
    fields: HashMap<String, String>,
}

impl ServerInfo {
    pub fn parse(raw: &str) -> Self {
        let fields = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .filter(|(_, value)| !value.contains(':'))
            .map(|(field, value)| (field.to_string(), value.to_string()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Numeric field, zero when missing or unparsable.
    pub fn number(&self, field: &str) -> u64 {
        self.get(field)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Sum of `keys=` across every `dbN` keyspace line.
    pub fn key_count(&self) -> u64 {
        self.fields
            .iter()
            .filter(|(field, _)| is_keyspace_field(field))
            .map(|(_, value)| keyspace_keys(value))
            .sum()
    }
}

fn is_keyspace_field(field: &str) -> bool {
    field
        .strip_prefix("db")
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

fn keyspace_keys(value: &str) -> u64 {
    value
        .split(',')
        .find_map(|part| part.strip_prefix("keys="))
        .and_then(|count| count.parse().ok())
        .unwrap_or(0)
}

/// Hit percentage rounded to two decimals; zero before any lookup.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    let rate = hits as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
