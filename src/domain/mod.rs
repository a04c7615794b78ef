//! Domain layer types and invariants.

pub mod blog;
pub mod error;
pub mod slug;
