//! HTTP surface: content routes behind the limiter and response cache, plus
//! store metrics and health.

mod middleware;
mod ops;
mod public;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::{
    application::{
        content::{BLOG_COLLECTION, ContentService},
        repos::ContentRepo,
    },
    cache::{BackgroundWriter, CacheConfig, CacheStore, ResponseCacheState, response_cache_layer},
    infra::kv::KvStore,
    monitor::StoreMonitor,
    rate_limit::{FixedWindowLimiter, RateLimitConfig, rate_limit_layer},
};

pub use middleware::RequestContext;

const LISTING_PATH: &str = "/content";

#[derive(Clone)]
pub struct HttpState {
    pub content: ContentService,
    pub monitor: StoreMonitor,
    pub limiter: FixedWindowLimiter,
    /// `None` when the shared cache is disabled.
    pub response_cache: Option<ResponseCacheState>,
}

impl HttpState {
    /// Wire every component to one shared store handle.
    pub fn new(
        store: Arc<dyn KvStore>,
        repo: Arc<dyn ContentRepo>,
        cache: CacheConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let cache = CacheStore::new(store.clone(), cache);
        let response_cache = cache.is_enabled().then(|| {
            ResponseCacheState::new(BackgroundWriter::new(cache.clone()), BLOG_COLLECTION)
                .with_listing_path(LISTING_PATH)
        });

        Self {
            content: ContentService::new(repo, cache),
            monitor: StoreMonitor::new(store.clone(), rate_limit.clone()),
            limiter: FixedWindowLimiter::new(store, rate_limit),
            response_cache,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    let content_routes = Router::new()
        .route(LISTING_PATH, get(public::list_content))
        .route("/content/{slug}", get(public::content_detail));

    let content_routes = match state.response_cache.clone() {
        Some(cache_state) => content_routes.layer(axum_middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        )),
        None => content_routes,
    };

    // Outermost, so rejected callers never reach the cache.
    let content_routes = content_routes.layer(axum_middleware::from_fn_with_state(
        state.limiter.clone(),
        rate_limit_layer,
    ));

    let ops_routes = Router::new()
        .route("/metrics", get(ops::store_metrics))
        .route("/_health/store", get(ops::store_health));

    content_routes
        .merge(ops_routes)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
