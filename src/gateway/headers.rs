//! Quota headers and throttling responses.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::ratelimit::RateLimitDecision;

/// Policy request budget per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window close time in epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Message returned to throttled clients.
const THROTTLED_MESSAGE: &str = "Too many requests, please try again later.";

/// JSON body of a 429 response.
#[derive(Debug, Serialize)]
struct ThrottledBody {
    error: &'static str,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

/// Attach the `X-RateLimit-*` headers for a decision.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_epoch_secs()));
}

/// Build the 429 response for a rejected decision.
pub fn throttled_response(decision: &RateLimitDecision, now_ms: u64) -> Response {
    let retry_after = decision.retry_after_secs(now_ms);
    let body = ThrottledBody {
        error: THROTTLED_MESSAGE,
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    apply_quota_headers(headers, decision);
    response
}
