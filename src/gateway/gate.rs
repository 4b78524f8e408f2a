//! Per-request policy application.
//!
//! Every non-excluded request is checked against the general policy. Requests
//! under the API prefix are first checked against the API policy, and a
//! rejection there ends the evaluation before the general check runs.

use axum::http::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{trace, warn};

use super::identity::ClientIdentityExtractor;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{
    ClassPolicies, RateLimitBackend, RateLimitDecision, RateLimitKey, TrafficClass,
};

/// How the gateway treats a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    /// Prefix that marks API traffic
    pub api_prefix: String,
    /// Prefixes that bypass rate limiting
    pub excluded: Vec<String>,
}

impl PathRules {
    /// Classify a path, or `None` if it bypasses rate limiting.
    ///
    /// Excluded prefixes match whole path segments, so `/healthz` covers
    /// `/healthz/ready` but not `/healthzfoo`.
    pub fn classify(&self, path: &str) -> Option<TrafficClass> {
        if self.excluded.iter().any(|prefix| covers_segment(prefix, path)) {
            return None;
        }
        if path.starts_with(self.api_prefix.as_str()) {
            Some(TrafficClass::Api)
        } else {
            Some(TrafficClass::General)
        }
    }
}

fn covers_segment(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl Default for PathRules {
    fn default() -> Self {
        let config = RateLimitingConfig::default();
        Self {
            api_prefix: config.api_prefix,
            excluded: config.excluded_paths,
        }
    }
}

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The path is excluded from rate limiting
    Bypassed,
    /// Every applicable check admitted the request
    Admitted {
        /// The request's own traffic class
        class: TrafficClass,
        /// Decision reported in the quota headers
        decision: RateLimitDecision,
    },
    /// A check rejected the request
    Throttled {
        /// The class whose policy rejected the request
        class: TrafficClass,
        /// The rejecting decision
        decision: RateLimitDecision,
    },
}

/// Applies the class policies to incoming requests.
pub struct RateLimitGate {
    backend: Arc<dyn RateLimitBackend>,
    policies: ClassPolicies,
    identity: ClientIdentityExtractor,
    paths: PathRules,
}

impl RateLimitGate {
    /// Create a gate over a limiter backend.
    pub fn new(
        backend: Arc<dyn RateLimitBackend>,
        policies: ClassPolicies,
        identity: ClientIdentityExtractor,
        paths: PathRules,
    ) -> Self {
        Self {
            backend,
            policies,
            identity,
            paths,
        }
    }

    /// Create a gate from the rate limiting section of the configuration.
    pub fn from_config(
        backend: Arc<dyn RateLimitBackend>,
        config: &RateLimitingConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            backend,
            config.policies()?,
            ClientIdentityExtractor::new(config.trust_proxy_headers),
            PathRules {
                api_prefix: config.api_prefix.clone(),
                excluded: config.excluded_paths.clone(),
            },
        ))
    }

    /// Evaluate one request.
    pub fn evaluate(
        &self,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> GateOutcome {
        let Some(class) = self.paths.classify(path) else {
            trace!(path = path, "Path excluded from rate limiting");
            return GateOutcome::Bypassed;
        };

        let client = self.identity.extract(headers, peer);

        let api_decision = if class == TrafficClass::Api {
            let decision = self.check(TrafficClass::Api, &client);
            if !decision.admitted {
                return self.throttled(TrafficClass::Api, &client, path, decision);
            }
            Some(decision)
        } else {
            None
        };

        let general_decision = self.check(TrafficClass::General, &client);
        if !general_decision.admitted {
            return self.throttled(TrafficClass::General, &client, path, general_decision);
        }

        GateOutcome::Admitted {
            class,
            decision: api_decision.unwrap_or(general_decision),
        }
    }

    fn check(&self, class: TrafficClass, client: &str) -> RateLimitDecision {
        let key = RateLimitKey::new(class, client);
        self.backend.check(&key.to_identifier(), self.policies.for_class(class))
    }

    fn throttled(
        &self,
        class: TrafficClass,
        client: &str,
        path: &str,
        decision: RateLimitDecision,
    ) -> GateOutcome {
        warn!(
            client = client,
            class = %class,
            path = path,
            limit = decision.limit,
            "Request throttled"
        );
        GateOutcome::Throttled { class, decision }
    }

    /// Number of identifiers currently tracked by the backend.
    pub fn tracked(&self) -> usize {
        self.backend.tracked()
    }
}
