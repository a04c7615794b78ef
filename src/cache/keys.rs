//! Cache key definitions.
//!
//! Keys are namespaced by collection so a single `<collection>:*` pattern
//! purges every query result and response cached for it.

use std::fmt;

use sha2::{Digest, Sha256};

/// Hex characters kept from the query digest.
const QUERY_HASH_LEN: usize = 16;

/// A key in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Result of a collection query: `<collection>:find:<query-hash>`.
    Find {
        collection: String,
        query_hash: String,
    },
    /// A document by id: `<collection>:findById:<id>`.
    FindById { collection: String, id: String },
    /// A document by slug: `<collection>:findBySlug:<slug>`.
    FindBySlug { collection: String, slug: String },
    /// A buffered HTTP response: `<namespace>:http:<path>:<query-hash>`.
    Response {
        namespace: String,
        path: String,
        query_hash: String,
    },
}

impl CacheKey {
    pub fn find(collection: &str, canonical_query: &str) -> Self {
        Self::Find {
            collection: collection.to_string(),
            query_hash: hash_query(canonical_query),
        }
    }

    pub fn find_by_id(collection: &str, id: impl fmt::Display) -> Self {
        Self::FindById {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn find_by_slug(collection: &str, slug: &str) -> Self {
        Self::FindBySlug {
            collection: collection.to_string(),
            slug: slug.to_string(),
        }
    }

    /// Response key independent of query parameter order.
    pub fn response(namespace: &str, path: &str, query: Option<&str>) -> Self {
        Self::Response {
            namespace: namespace.to_string(),
            path: path.to_string(),
            query_hash: hash_query(&canonical_query_string(query.unwrap_or(""))),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Find {
                collection,
                query_hash,
            } => write!(f, "{collection}:find:{query_hash}"),
            Self::FindById { collection, id } => write!(f, "{collection}:findById:{id}"),
            Self::FindBySlug { collection, slug } => write!(f, "{collection}:findBySlug:{slug}"),
            Self::Response {
                namespace,
                path,
                query_hash,
            } => write!(f, "{namespace}:http:{path}:{query_hash}"),
        }
    }
}

/// Glob matching every key cached for `collection`.
pub fn collection_pattern(collection: &str) -> String {
    format!("{collection}:*")
}

/// Stable digest of a canonical query string.
///
/// SHA-256 rather than `DefaultHasher` so every instance sharing the store
/// derives the same key.
pub fn hash_query(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut encoded = hex::encode(&digest[..]);
    encoded.truncate(QUERY_HASH_LEN);
    encoded
}

/// Sort `a=1&b=2` style pairs so parameter order does not split the cache.
pub fn canonical_query_string(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(
            CacheKey::find_by_id("blogs", 42).to_string(),
            "blogs:findById:42"
        );
        assert_eq!(
            CacheKey::find_by_slug("blogs", "hello-world").to_string(),
            "blogs:findBySlug:hello-world"
        );

        let find = CacheKey::find("blogs", "limit=10&page=1").to_string();
        assert!(find.starts_with("blogs:find:"));
        assert_eq!(find.len(), "blogs:find:".len() + QUERY_HASH_LEN);
    }

    #[test]
    fn response_key_ignores_parameter_order() {
        let a = CacheKey::response("blogs", "/content", Some("page=2&limit=5"));
        let b = CacheKey::response("blogs", "/content", Some("limit=5&page=2"));
        let c = CacheKey::response("blogs", "/content", Some("limit=5&page=3"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string().starts_with("blogs:http:/content:"));
    }

    #[test]
    fn empty_and_missing_query_share_a_key() {
        assert_eq!(
            CacheKey::response("blogs", "/content", None),
            CacheKey::response("blogs", "/content", Some(""))
        );
    }

    #[test]
    fn hash_query_is_stable() {
        // First 16 hex chars of SHA-256("").
        assert_eq!(hash_query(""), "e3b0c44298fc1c14");
        assert_eq!(hash_query("limit=10"), hash_query("limit=10"));
    }

    #[test]
    fn every_key_falls_under_its_collection_pattern() {
        let pattern = collection_pattern("blogs");
        for key in [
            CacheKey::find("blogs", "q"),
            CacheKey::find_by_id("blogs", "1"),
            CacheKey::find_by_slug("blogs", "s"),
            CacheKey::response("blogs", "/content", None),
        ] {
            assert!(crate::infra::kv::glob_match(&pattern, &key.to_string()));
        }
    }
}
