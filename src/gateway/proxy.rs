//! Upstream forwarding for admitted requests.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use serde::Serialize;
use std::error::Error as _;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

use super::identity::X_FORWARDED_FOR;
use crate::error::{Result, TurnstileError};

/// Largest request body buffered for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that describe a single connection and must not be relayed.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// HTTP client bound to the upstream site.
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl Upstream {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Full upstream URL for an inbound path and query.
    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Relay a request upstream and convert the answer back into a response.
    pub async fn forward(&self, request: Request, peer: Option<SocketAddr>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let url = self.target_url(
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        );

        if declared_length(&parts.headers).is_some_and(|len| len > MAX_BODY_BYTES as u64) {
            return Err(TurnstileError::PayloadTooLarge(MAX_BODY_BYTES));
        }
        let body = to_bytes(body, MAX_BODY_BYTES).await.map_err(body_error)?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        if let Some(peer) = peer {
            append_forwarded_for(&mut headers, peer);
        }

        debug!(method = %parts.method, url = %url, "Forwarding request upstream");

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn classify(&self, err: reqwest::Error) -> TurnstileError {
        if err.is_timeout() {
            TurnstileError::UpstreamTimeout(self.timeout_secs)
        } else {
            TurnstileError::Upstream(err)
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn body_error(err: axum::Error) -> TurnstileError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return TurnstileError::PayloadTooLarge(MAX_BODY_BYTES);
        }
        source = e.source();
    }
    TurnstileError::RequestBody(err.to_string())
}

/// Copy a header map without connection-scoped headers.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out
}

/// Append the peer IP to `X-Forwarded-For`, creating the header if missing.
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let client_ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Error body for gateway failures.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for TurnstileError {
    fn into_response(self) -> Response {
        let status = match &self {
            TurnstileError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TurnstileError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TurnstileError::RequestBody(_) => StatusCode::BAD_REQUEST,
            TurnstileError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TurnstileError::Config(_)
            | TurnstileError::InvalidPolicy(_)
            | TurnstileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(error = %self, "Gateway request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
