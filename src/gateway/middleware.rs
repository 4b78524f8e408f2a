//! Rate limiting middleware for axum.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::gate::{GateOutcome, RateLimitGate};
use super::headers::{apply_quota_headers, throttled_response};
use crate::ratelimit::Clock;

/// State needed by the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitLayerState {
    /// The gate that evaluates requests
    pub gate: Arc<RateLimitGate>,
    /// Time source for `Retry-After`, shared with the limiter
    pub clock: Arc<dyn Clock>,
}

/// Axum `from_fn_with_state` middleware that enforces the class policies.
///
/// Throttled requests get a 429 and never reach the inner service. Admitted
/// requests run normally and the quota headers are added to the response.
pub async fn enforce_rate_limits(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let outcome = state
        .gate
        .evaluate(request.uri().path(), request.headers(), peer);

    match outcome {
        GateOutcome::Bypassed => next.run(request).await,
        GateOutcome::Throttled { decision, .. } => {
            throttled_response(&decision, state.clock.now_ms())
        }
        GateOutcome::Admitted { decision, .. } => {
            let mut response = next.run(request).await;
            apply_quota_headers(response.headers_mut(), &decision);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::gate::PathRules;
    use crate::gateway::headers::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
    use crate::gateway::identity::ClientIdentityExtractor;
    use crate::ratelimit::{ClassPolicies, ManualClock, RateLimitPolicy, RateLimiter};
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    const START_MS: u64 = 1_700_000_000_000;

    fn app(api_max: u64, general_max: u64) -> (Router, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START_MS));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        let gate = RateLimitGate::new(
            limiter,
            ClassPolicies {
                api: RateLimitPolicy::from_millis(1_000, api_max).unwrap(),
                general: RateLimitPolicy::from_millis(1_000, general_max).unwrap(),
            },
            ClientIdentityExtractor::default(),
            PathRules::default(),
        );
        let state = RateLimitLayerState {
            gate: Arc::new(gate),
            clock: clock.clone(),
        };

        let router = Router::new()
            .route("/", get(|| async { "home" }))
            .route("/api/packages", get(|| async { "packages" }))
            .route("/favicon.ico", get(|| async { "icon" }))
            .layer(axum::middleware::from_fn_with_state(state, enforce_rate_limits));
        (router, clock)
    }

    fn request(path: &str, ip: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_headers() {
        let (app, _clock) = app(20, 100);

        let response = app.oneshot(request("/", "1.2.3.4")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "100");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "99");
        assert_eq!(
            response.headers()[X_RATELIMIT_RESET],
            ((START_MS + 1_000) / 1_000).to_string().as_str()
        );
    }

    #[tokio::test]
    async fn test_api_response_reports_api_quota() {
        let (app, _clock) = app(20, 100);

        let response = app
            .oneshot(request("/api/packages", "1.2.3.4"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "20");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "19");
    }

    #[tokio::test]
    async fn test_throttled_after_limit() {
        let (app, clock) = app(3, 100);

        for expected in ["2", "1", "0"] {
            let response = app
                .clone()
                .oneshot(request("/api/packages", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[X_RATELIMIT_REMAINING], expected);
        }

        clock.advance(400);
        let response = app
            .clone()
            .oneshot(request("/api/packages", "1.2.3.4"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
        assert_eq!(body["retryAfter"], 1);

        clock.advance(600);
        let response = app
            .oneshot(request("/api/packages", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "2");
    }

    #[tokio::test]
    async fn test_excluded_path_has_no_quota_headers() {
        let (app, _clock) = app(1, 1);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request("/favicon.ico", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
        }
    }

    #[tokio::test]
    async fn test_peer_address_used_when_headers_untrusted() {
        let clock = Arc::new(ManualClock::new(START_MS));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        let gate = RateLimitGate::new(
            limiter.clone(),
            ClassPolicies::default(),
            ClientIdentityExtractor::new(false),
            PathRules::default(),
        );
        let state = RateLimitLayerState {
            gate: Arc::new(gate),
            clock,
        };
        let app = Router::new()
            .route("/", get(|| async { "home" }))
            .layer(axum::middleware::from_fn_with_state(state, enforce_rate_limits));

        let peer: SocketAddr = "203.0.113.9:40000".parse().unwrap();
        let mut req = request("/", "9.9.9.9");
        req.extensions_mut().insert(ConnectInfo(peer));

        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(limiter.count("general:203.0.113.9"), Some(1));
        assert_eq!(limiter.count("general:9.9.9.9"), None);
    }
}
