//! Rate limit policies and traffic classes.
//!
//! A policy is a fixed window length plus the number of requests admitted per
//! window. Each traffic class carries its own policy and its own identifier
//! namespace, so a client's API quota and general quota are tracked apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Window used by both default policies (15 minutes).
const DEFAULT_WINDOW_MS: u64 = 15 * 60 * 1000;
/// Default request budget for API traffic.
const DEFAULT_API_MAX_REQUESTS: u64 = 20;
/// Default request budget for general traffic.
const DEFAULT_GENERAL_MAX_REQUESTS: u64 = 100;

/// A validated fixed-window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    window: Duration,
    max_requests: u64,
}

impl RateLimitPolicy {
    /// Create a policy, rejecting a zero window or a zero request budget.
    pub fn new(window: Duration, max_requests: u64) -> Result<Self> {
        if window.as_millis() == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "window must be at least 1 millisecond".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "max_requests must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            window,
            max_requests,
        })
    }

    /// Create a policy from a window length in milliseconds.
    pub fn from_millis(window_ms: u64, max_requests: u64) -> Result<Self> {
        Self::new(Duration::from_millis(window_ms), max_requests)
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Get the number of requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

/// Unvalidated policy as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
}

impl PolicyConfig {
    /// Default API policy: 20 requests per 15 minutes.
    pub fn api_default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_API_MAX_REQUESTS,
        }
    }

    /// Default general policy: 100 requests per 15 minutes.
    pub fn general_default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_GENERAL_MAX_REQUESTS,
        }
    }
}

impl TryFrom<PolicyConfig> for RateLimitPolicy {
    type Error = TurnstileError;

    fn try_from(config: PolicyConfig) -> Result<Self> {
        RateLimitPolicy::from_millis(config.window_ms, config.max_requests)
    }
}

/// The traffic classes the gateway limits independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Requests under the API prefix
    Api,
    /// Every other non-excluded request
    General,
}

impl TrafficClass {
    /// Namespace prefix used in limiter identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Api => "api",
            TrafficClass::General => "general",
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated policy per traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicies {
    /// Policy for API traffic
    pub api: RateLimitPolicy,
    /// Policy for general traffic
    pub general: RateLimitPolicy,
}

impl ClassPolicies {
    /// Get the policy for a traffic class.
    pub fn for_class(&self, class: TrafficClass) -> &RateLimitPolicy {
        match class {
            TrafficClass::Api => &self.api,
            TrafficClass::General => &self.general,
        }
    }
}

impl Default for ClassPolicies {
    fn default() -> Self {
        Self {
            api: RateLimitPolicy {
                window: Duration::from_millis(DEFAULT_WINDOW_MS),
                max_requests: DEFAULT_API_MAX_REQUESTS,
            },
            general: RateLimitPolicy {
                window: Duration::from_millis(DEFAULT_WINDOW_MS),
                max_requests: DEFAULT_GENERAL_MAX_REQUESTS,
            },
        }
    }
}
