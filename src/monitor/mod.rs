//! Store health and usage reporting.
//!
//! Hit rate, memory and uptime come from the store's `INFO` reply; limiter
//! occupancy comes from a scan of the rate counters.

mod collector;
mod format;
mod info;

pub use collector::{
    ConnectionStatus, MemoryUsage, MetricsSnapshot, RateLimitOccupancy, StoreMonitor, Uptime,
};
pub use format::format_bytes;
pub use info::{ServerInfo, hit_rate};
