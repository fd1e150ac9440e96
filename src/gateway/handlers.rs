//! Route handlers: the in-process stub and the reverse proxy.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn, Span};
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{HandlerResponse, InboundRequest};
use crate::observability::instrumentation::Instrumentation;
use crate::observability::metrics::UPSTREAM_DURATION_SECONDS;
use crate::observability::tracing::{inject_context, TRACEPARENT};

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Placeholder in local messages replaced by the raw query string
pub const QUERY_PLACEHOLDER: &str = "{query}";

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Request headers the client stack sets itself. `accept-encoding` is left
/// out so backends answer uncompressed: response bodies are cached and
/// replayed without their encoding.
fn is_forwardable(name: &str) -> bool {
    !["host", "content-length", "accept-encoding"]
        .iter()
        .any(|skip| name.eq_ignore_ascii_case(skip))
}

fn is_trace_context(name: &str) -> bool {
    name.eq_ignore_ascii_case(TRACEPARENT) || name.eq_ignore_ascii_case("tracestate")
}

/// Produces the response for a route once admission and cache lookup are done
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    /// `span` is the route span; outbound calls propagate its context
    async fn handle(&self, request: &InboundRequest, span: &Span) -> GatewayResult<HandlerResponse>;

    fn kind(&self) -> &'static str;
}

/// Answers with a fixed `{"message": ...}` body
#[derive(Debug, Clone)]
pub struct StubHandler {
    message: String,
}

impl StubHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl EndpointHandler for StubHandler {
    async fn handle(&self, request: &InboundRequest, _span: &Span) -> GatewayResult<HandlerResponse> {
        let message = self.message.replace(QUERY_PLACEHOLDER, request.query());
        HandlerResponse::json_message(&message)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Shared HTTP client for all proxied routes
pub fn build_http_client(upstream_timeout: Duration) -> GatewayResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(upstream_timeout)
        .build()?)
}

/// Forwards the request to a backend and relays its answer verbatim
///
/// Connection failures and timeouts map to 503; a response that cannot be
/// read back maps to 502. Nothing is retried.
pub struct ProxyHandler {
    client: reqwest::Client,
    target: Url,
    route: String,
    instance_id: String,
    instrumentation: Arc<dyn Instrumentation>,
}

impl ProxyHandler {
    pub fn new(
        client: reqwest::Client,
        target: Url,
        route: impl Into<String>,
        instance_id: impl Into<String>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        Self {
            client,
            target,
            route: route.into(),
            instance_id: instance_id.into(),
            instrumentation,
        }
    }

    fn upstream_url(&self, request: &InboundRequest) -> Url {
        let mut url = self.target.clone();
        if let Some(query) = request.uri.query().filter(|query| !query.is_empty()) {
            url.set_query(Some(query));
        }
        url
    }

    fn service(&self) -> String {
        self.target
            .host_str()
            .map(|host| match self.target.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
            .unwrap_or_else(|| self.target.to_string())
    }

    fn relay_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in upstream {
            if is_hop_by_hop(name.as_str()) || name.as_str() == "content-length" {
                continue;
            }
            // reqwest and axum sit on different `http` majors
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }
        headers
    }
}

#[async_trait]
impl EndpointHandler for ProxyHandler {
    async fn handle(&self, request: &InboundRequest, span: &Span) -> GatewayResult<HandlerResponse> {
        let url = self.upstream_url(request);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| GatewayError::internal(format!("Unsupported method: {}", e)))?;

        // The gateway span replaces the caller's context when one is recorded
        let trace_context = inject_context(span);

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            let name = name.as_str();
            if is_hop_by_hop(name) || !is_forwardable(name) {
                continue;
            }
            if !trace_context.is_empty() && is_trace_context(name) {
                continue;
            }
            builder = builder.header(name, value.as_bytes());
        }
        for (name, value) in trace_context {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        debug!(upstream = %url, method = %request.method, "Forwarding request");
        let started = Instant::now();
        let sent = builder.send().await;
        self.instrumentation.record_duration(
            UPSTREAM_DURATION_SECONDS,
            started.elapsed(),
            &[
                ("route", self.route.clone()),
                ("instance", self.instance_id.clone()),
            ],
        );

        let upstream = match sent {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(GatewayError::internal(format!("Invalid upstream request: {}", e)));
            }
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                warn!(upstream = %url, error = %e, "Upstream unavailable");
                return Err(GatewayError::service_unavailable(self.service(), e.to_string()));
            }
            Err(e) => {
                warn!(upstream = %url, error = %e, "Upstream returned an unusable response");
                return Err(GatewayError::bad_gateway(self.service(), e.to_string()));
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| GatewayError::bad_gateway(self.service(), e.to_string()))?;
        let headers = Self::relay_headers(upstream.headers());
        let body = upstream.bytes().await.map_err(|e| {
            warn!(upstream = %url, error = %e, "Failed to read upstream body");
            GatewayError::bad_gateway(self.service(), e.to_string())
        })?;

        debug!(upstream = %url, status = status.as_u16(), bytes = body.len(), "Upstream responded");
        Ok(HandlerResponse {
            status,
            headers,
            body,
        })
    }

    fn kind(&self) -> &'static str {
        "proxy"
    }
}
