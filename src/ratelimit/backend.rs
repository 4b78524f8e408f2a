//! Rate limiter trait for abstracting the counter store.

use super::limiter::RateLimitDecision;
use super::policy::RateLimitPolicy;

/// Trait for rate limiter implementations.
///
/// The gateway only talks to this trait. The in-process `RateLimiter` is the
/// one implementation; a store shared between instances would be another.
pub trait RateLimitBackend: Send + Sync {
    /// Count a request for `identifier` and decide whether to admit it.
    fn check(&self, identifier: &str, policy: &RateLimitPolicy) -> RateLimitDecision;

    /// Number of identifiers currently holding a window.
    fn tracked(&self) -> usize;
}
