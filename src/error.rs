//! Error types for the Turnstile gateway.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limit policy with a zero window or zero request budget
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// The upstream site could not be reached or returned a broken response
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The inbound request body could not be read
    #[error("Request body error: {0}")]
    RequestBody(String),

    /// The inbound request body exceeds the forwarding limit
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The upstream site did not answer in time
    #[error("Upstream timed out after {0} seconds")]
    UpstreamTimeout(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
