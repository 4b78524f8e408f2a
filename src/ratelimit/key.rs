//! Limiter identifier generation.

use std::fmt;

use super::policy::TrafficClass;

/// A key that uniquely identifies one client within one traffic class.
///
/// The same client IP yields distinct keys for API and general traffic, so
/// the two quotas never share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The traffic class this key is scoped to
    pub class: TrafficClass,
    /// The resolved client identity (usually an IP address)
    pub client: String,
}

impl RateLimitKey {
    /// Create a new key from a traffic class and a client identity.
    pub fn new(class: TrafficClass, client: impl Into<String>) -> Self {
        Self {
            class,
            client: client.into(),
        }
    }

    /// Render the key as the identifier string stored by the limiter.
    pub fn to_identifier(&self) -> String {
        format!("{}:{}", self.class, self.client)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.client)
    }
}
