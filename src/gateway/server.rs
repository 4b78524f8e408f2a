//! HTTP gateway server implementation.

use axum::{
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::gate::RateLimitGate;
use super::middleware::{enforce_rate_limits, RateLimitLayerState};
use super::proxy::Upstream;
use crate::config::TurnstileConfig;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Clock, RateLimiter, SystemClock};

/// Gateway state shared across handlers.
pub struct GatewayState {
    /// Rate limiting gate and its clock
    pub limits: RateLimitLayerState,
    /// Client for the upstream site
    pub upstream: Upstream,
}

impl GatewayState {
    /// Create gateway state from its parts.
    pub fn new(limits: RateLimitLayerState, upstream: Upstream) -> Self {
        Self { limits, upstream }
    }

    /// Build the limiter, gate, and upstream client described by `config`.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Like `from_config`, with an explicit time source.
    pub fn from_config_with_clock(config: &TurnstileConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        let gate = RateLimitGate::from_config(limiter, &config.rate_limiting)?;
        let upstream = Upstream::new(
            &config.server.upstream_url,
            Duration::from_secs(config.server.upstream_timeout_secs),
        )?;

        Ok(Self::new(
            RateLimitLayerState {
                gate: Arc::new(gate),
                clock,
            },
            upstream,
        ))
    }
}

/// Build the gateway router: local health check, everything else proxied,
/// all of it behind the rate limiting middleware.
pub fn router(state: Arc<GatewayState>) -> Router {
    let limits = state.limits.clone();

    Router::new()
        .route("/healthz", get(health))
        .fallback(forward)
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(limits, enforce_rate_limits))
}

async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "tracked_clients": state.limits.gate.tracked(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn forward(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match state.upstream.forward(request, peer).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// HTTP server for the rate limiting gateway.
pub struct GatewayServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared gateway state
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(addr: SocketAddr, state: Arc<GatewayState>) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.addr, "Starting HTTP gateway");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP gateway failed");
                TurnstileError::Io(e)
            })
    }
}
