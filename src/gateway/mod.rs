//! HTTP gateway that applies the rate limits in front of the website.

mod gate;
mod headers;
mod identity;
mod middleware;
mod proxy;
mod server;

pub use gate::{GateOutcome, PathRules, RateLimitGate};
pub use headers::{
    apply_quota_headers, throttled_response, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use identity::{identify, ClientIdentityExtractor, UNKNOWN_CLIENT};
pub use middleware::{enforce_rate_limits, RateLimitLayerState};
pub use proxy::Upstream;
pub use server::{router, GatewayServer, GatewayState};
