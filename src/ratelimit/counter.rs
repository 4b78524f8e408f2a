//! Fixed-window counter records.

/// A request counter for one identifier within one fixed window.
///
/// The window opens when the entry is created and closes at `reset_time_ms`.
/// It is never extended: later requests only bump `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests seen in the current window, rejected ones included
    count: u64,
    /// Epoch milliseconds at which the window closes
    reset_time_ms: u64,
}

impl RateLimitEntry {
    /// Open a new window at `now_ms` that lasts `window_ms`, counting the
    /// request that opened it.
    pub fn open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_time_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Count one more request and return the new total.
    pub fn increment(&mut self) -> u64 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Whether the window has closed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_time_ms
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the epoch milliseconds at which this window closes.
    pub fn reset_time_ms(&self) -> u64 {
        self.reset_time_ms
    }
}
