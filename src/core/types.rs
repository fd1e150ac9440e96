//! # Core Types Module
//!
//! Request and response types shared by the routing, admission control and
//! caching layers.
//!
//! - [`InboundRequest`] is the buffered view of a client request the pipeline works on.
//! - [`RequestContext`] carries per-request identity and the active trace span.
//!   It is created by the dispatcher and never shared between requests.
//! - [`RateDecision`] is the outcome of one admission check.
//! - [`HandlerResponse`] is what a handler produces and what the cache stores.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};

use crate::core::error::{GatewayError, GatewayResult};

/// Represents an incoming request after its body has been buffered
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,

    /// Request URI including path and query parameters
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Request body; `Bytes` makes clones cheap
    pub body: Bytes,

    /// Client's remote address as reported by the listener
    pub client_addr: String,
}

impl InboundRequest {
    /// Request path without the query string
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, empty when absent
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }
}

/// Key under which a client's admission counter is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Requests still admissible in the current window
    pub remaining: u32,

    /// Time until the current window rolls over
    pub reset_after: Duration,
}

/// Per-request context
///
/// Holds the trace identifiers and the span every stage of the pipeline
/// records into.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Trace identifier, propagated from `traceparent` when present
    pub trace_id: String,

    /// Span covering the route handling
    pub span: tracing::Span,

    /// Limiter key of the client, set once admission control has run
    pub client_identity: Option<ClientIdentity>,

    /// Client address as seen by the listener
    pub client_addr: String,

    /// Matched route path
    pub route: String,

    /// When the gateway started processing the request
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new<S: Into<String>>(trace_id: String, client_addr: S, route: S) -> Self {
        Self {
            trace_id,
            span: tracing::Span::none(),
            client_identity: None,
            client_addr: client_addr.into(),
            route: route.into(),
            started_at: Instant::now(),
        }
    }

    /// Time elapsed since the request entered the gateway
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Response produced by a handler
///
/// Forwarded responses keep the backend's status and headers; local handlers
/// produce a JSON body.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HandlerResponse {
    /// Build a `{"message": ...}` response
    pub fn json_message(message: &str) -> GatewayResult<Self> {
        let body = serde_json::to_vec(&json!({ "message": message }))
            .map_err(|e| GatewayError::encoding(e.to_string()))?;
        Ok(Self::json(StatusCode::OK, Bytes::from(body)))
    }

    /// Build a response with a JSON content type around pre-encoded bytes
    pub fn json(status: StatusCode, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
