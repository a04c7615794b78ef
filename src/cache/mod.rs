//! Cachet cache-aside layer.
//!
//! JSON values and HTTP responses are cached in the shared key-value store:
//!
//! - **Object cache** ([`CacheStore`]): query results and documents, read
//!   through with [`CacheStore::get_or_fetch`]
//! - **Response cache** ([`response_cache_layer`]): buffered GET responses,
//!   populated off the request path by a bounded [`BackgroundWriter`]
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_secs = 300
//! listing_ttl_secs = 3600
//! population_concurrency = 32
//! ```

mod config;
mod keys;
mod middleware;
mod store;
mod writer;

pub use config::CacheConfig;
pub use keys::{CacheKey, canonical_query_string, collection_pattern, hash_query};
pub use middleware::{ResponseCacheState, X_CACHE, response_cache_layer};
pub use store::{CacheError, CacheOutcome, CacheStore};
pub use writer::BackgroundWriter;
