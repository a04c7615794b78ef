//! Application services layer.

pub mod content;
pub mod error;
pub mod repos;
pub mod selftest;
