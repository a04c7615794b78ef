//! Response cache middleware.
//!
//! Serves cached JSON for GET requests and populates the cache from
//! successful JSON responses through the [`BackgroundWriter`].

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_TYPE, HeaderMap},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use super::{keys::CacheKey, writer::BackgroundWriter};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for [`response_cache_layer`].
#[derive(Clone)]
pub struct ResponseCacheState {
    pub writer: BackgroundWriter,
    /// Leading key segment, normally the collection the routes serve.
    pub namespace: String,
    /// Path whose unqueried response lives for the listing TTL.
    pub listing_path: Option<String>,
}

impl ResponseCacheState {
    pub fn new(writer: BackgroundWriter, namespace: impl Into<String>) -> Self {
        Self {
            writer,
            namespace: namespace.into(),
            listing_path: None,
        }
    }

    pub fn with_listing_path(mut self, path: impl Into<String>) -> Self {
        self.listing_path = Some(path.into());
        self
    }

    fn ttl_for(&self, path: &str, query: Option<&str>) -> u64 {
        let config = self.writer.cache().config();
        let top_level = self.listing_path.as_deref() == Some(path)
            && query.is_none_or(str::is_empty);
        if top_level {
            config.listing_ttl_secs
        } else {
            config.default_ttl_secs
        }
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(state): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cache = state.writer.cache();
    if !cache.is_enabled() || request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = CacheKey::response(
        &state.namespace,
        request.uri().path(),
        request.uri().query(),
    )
    .to_string();
    let ttl_secs = state.ttl_for(request.uri().path(), request.uri().query());

    if let Some(cached) = cache.get_raw(&key, "response").await {
        debug!(cache = "response", outcome = "hit", "serving cached response");
        return cached_response(cached);
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("MISS"));

    if !response.status().is_success() || !is_json(response.headers()) {
        return response;
    }

    let limit = cache.config().response_body_limit_bytes;
    let within_limit = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len as usize <= limit);
    if !within_limit {
        debug!(cache = "response", "response body too large or unsized, not caching");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    if let Ok(raw) = std::str::from_utf8(&bytes) {
        debug!(cache = "response", outcome = "miss", "populating response cache");
        let _ = state.writer.dispatch(key, raw.to_string(), ttl_secs);
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

fn cached_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(X_CACHE, "HIT")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cache::{CacheConfig, CacheStore},
        infra::kv::MemoryStore,
    };

    #[test]
    fn only_the_unqueried_listing_gets_the_listing_ttl() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default());
        let state = ResponseCacheState::new(BackgroundWriter::new(cache), "blogs")
            .with_listing_path("/content");

        assert_eq!(state.ttl_for("/content", None), 3600);
        assert_eq!(state.ttl_for("/content", Some("")), 3600);
        assert_eq!(state.ttl_for("/content", Some("limit=2")), 300);
        assert_eq!(state.ttl_for("/content/fixed-windows", None), 300);

        let plain = ResponseCacheState::new(state.writer.clone(), "blogs");
        assert_eq!(plain.ttl_for("/content", None), 300);
    }

    #[test]
    fn json_detection_accepts_charset_suffix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert!(!is_json(&headers));

        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn cached_response_is_marked_hit() {
        let response = cached_response("{\"ok\":true}".to_string());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
