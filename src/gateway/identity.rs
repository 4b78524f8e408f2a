//! Client identity extraction.
//!
//! The left-most `X-Forwarded-For` entry is whatever the client put there
//! unless a trusted edge proxy overwrites the header. Deployments without
//! such a proxy should turn `trust_proxy_headers` off so the TCP peer address
//! is used instead.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Forwarded-address chain header.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Single real-IP header set by nginx-style proxies.
pub const X_REAL_IP: &str = "x-real-ip";
/// Identity shared by every client that cannot be resolved.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve a client identity from proxy headers.
///
/// Prefers the first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// `"unknown"` sentinel.
pub fn identify(headers: &HeaderMap) -> String {
    if let Some(first) = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers.get(X_REAL_IP).and_then(|value| value.to_str().ok()) {
        return real_ip.to_string();
    }

    UNKNOWN_CLIENT.to_string()
}

/// Chooses between proxy headers and the TCP peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentityExtractor {
    trust_proxy_headers: bool,
}

impl ClientIdentityExtractor {
    /// Create an extractor.
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }

    /// Resolve the identity for one request.
    pub fn extract(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy_headers {
            return identify(headers);
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

impl Default for ClientIdentityExtractor {
    fn default() -> Self {
        Self::new(true)
    }
}
