//! Cache-aside and fixed-window rate limiting edge for blog content, backed by
//! a shared key-value store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod monitor;
pub mod rate_limit;
