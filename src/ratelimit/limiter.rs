//! Core fixed-window rate limiter implementation.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::RateLimitBackend;
use super::clock::{Clock, SystemClock};
use super::counter::RateLimitEntry;
use super::policy::RateLimitPolicy;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The policy's request budget per window
    pub limit: u64,
    /// Requests still available in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which the current window closes
    pub reset_time_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds a throttled client should wait, rounded up and never zero.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time_ms
            .saturating_sub(now_ms)
            .div_ceil(1000)
            .max(1)
    }

    /// Reset time in epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_time_ms.div_ceil(1000)
    }
}

/// The process-local rate limiter that owns every counter.
///
/// Counters live in a sharded concurrent map. The read-modify-write for one
/// identifier happens under that identifier's shard lock, so parallel requests
/// from the same client are counted exactly.
pub struct RateLimiter {
    /// Window records indexed by identifier
    store: DashMap<String, RateLimitEntry>,
    /// Time source for window bookkeeping
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new rate limiter with a custom time source.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: DashMap::new(),
            clock,
        }
    }

    /// Count a request for `identifier` and decide whether to admit it.
    ///
    /// Expired windows for every identifier are dropped first. Requests that
    /// are rejected still count, so a client that keeps hammering does not
    /// get a fresh budget until its window closes.
    pub fn check(&self, identifier: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let now = self.clock.now_ms();
        self.purge_expired(now);

        let limit = policy.max_requests();

        let decision = match self.store.entry(identifier.to_owned()) {
            Entry::Vacant(slot) => {
                let entry = slot.insert(RateLimitEntry::open(now, policy.window_ms()));
                Self::opened(identifier, limit, entry.reset_time_ms())
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    let entry = RateLimitEntry::open(now, policy.window_ms());
                    slot.insert(entry);
                    Self::opened(identifier, limit, entry.reset_time_ms())
                } else {
                    let entry = slot.get_mut();
                    let count = entry.increment();
                    RateLimitDecision {
                        admitted: count <= limit,
                        limit,
                        remaining: limit.saturating_sub(count),
                        reset_time_ms: entry.reset_time_ms(),
                    }
                }
            }
        };

        trace!(
            identifier = identifier,
            admitted = decision.admitted,
            remaining = decision.remaining,
            "Checked rate limit"
        );

        if !decision.admitted {
            debug!(identifier = identifier, limit = limit, "Rate limit exceeded");
        }

        decision
    }

    fn opened(identifier: &str, limit: u64, reset_time_ms: u64) -> RateLimitDecision {
        debug!(
            identifier = identifier,
            limit = limit,
            reset_time_ms = reset_time_ms,
            "Opening new rate limit window"
        );
        RateLimitDecision {
            admitted: true,
            limit,
            remaining: limit - 1,
            reset_time_ms,
        }
    }

    fn purge_expired(&self, now_ms: u64) {
        self.store.retain(|_, entry| !entry.is_expired(now_ms));
    }

    /// Get the current count for an identifier.
    ///
    /// Returns `None` if the identifier holds no window.
    pub fn count(&self, identifier: &str) -> Option<u64> {
        self.store.get(identifier).map(|entry| entry.count())
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Get the number of stored windows, expired ones not yet purged included.
    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitBackend for RateLimiter {
    fn check(&self, identifier: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        RateLimiter::check(self, identifier, policy)
    }

    fn tracked(&self) -> usize {
        RateLimiter::tracked(self)
    }
}
