use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use time::OffsetDateTime;

use crate::application::error::ErrorReport;

use super::{Admission, FixedWindowLimiter, RateLimitInfo};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_IDENTITY: &str = "unknown";

pub async fn rate_limit_layer(
    State(limiter): State<FixedWindowLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = client_identity(request.headers());

    match limiter.check(&identity).await {
        Admission::Limited(info) => rate_limited_response(&info),
        Admission::Allowed(info) => {
            let mut response = next.run(request).await;
            if let Some(info) = info {
                insert_rate_limit_headers(response.headers_mut(), &info);
            }
            response
        }
    }
}

/// The first `X-Forwarded-For` hop, then `X-Real-IP`, then `unknown`.
pub fn client_identity(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

/// 429 with `Retry-After` and the rate limit headers.
pub fn rate_limited_response(info: &RateLimitInfo) -> Response {
    let retry_after = info.retry_after_secs(OffsetDateTime::now_utc());
    let body = json!({
        "error": "Too many requests",
        "message": format!("Rate limit exceeded, retry after {retry_after} seconds"),
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    insert_rate_limit_headers(headers, info);

    ErrorReport::from_message(
        "rate_limit::middleware",
        StatusCode::TOO_MANY_REQUESTS,
        format!("rate_limited: retry_after={retry_after}"),
    )
    .attach(&mut response);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(info.reset_at.unix_timestamp()),
    );
}
