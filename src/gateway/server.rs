//! # HTTP Server Module
//!
//! Assembles the gateway's axum application and runs it.
//!
//! ## Request flow
//! 1. `TraceLayer` opens the request span, parented on any inbound `traceparent`
//! 2. The trace id is resolved and echoed back as `x-trace-id`
//! 3. [`dispatch_request`] classifies the path, runs admission control, opens
//!    the route span and hands over to the route's [`CachedEndpoint`]
//! 4. Request counters and latency are recorded on every exit path
//!
//! `/health` and the metrics endpoint are served directly and bypass the
//! limiter and the cache.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router as AxumRouter,
};
use http_body_util::LengthLimitError;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::caching::{CacheStore, InMemoryCache, RedisCache, ResponseCache};
use crate::core::config::{GatewayConfig, StoreBackend};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::redis::RedisConnection;
use crate::core::types::{InboundRequest, RateDecision, RequestContext};
use crate::gateway::endpoint::{CachedEndpoint, EndpointResponse};
use crate::gateway::handlers::{build_http_client, EndpointHandler, ProxyHandler, StubHandler};
use crate::middleware::rate_limiting::{
    InMemoryStorage, RateLimitPolicy, RateLimitStorage, RateLimiter, RedisStorage,
};
use crate::observability::instrumentation::{Instrumentation, Telemetry};
use crate::observability::metrics::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::observability::tracing::{make_request_span, resolve_trace_id};
use crate::routing::{HandlerKind, Router};

/// Response header carrying the request's trace id
pub const X_TRACE_ID: &str = "x-trace-id";

/// Route label for requests that matched no route
const UNMATCHED_ROUTE: &str = "unmatched";

/// Client address used when the listener did not record one
const UNKNOWN_CLIENT: &str = "unknown";

/// Trace id resolved for the current request, stored in request extensions
#[derive(Debug, Clone)]
pub struct TraceIdentifier(pub String);

/// Stores and instrumentation the gateway is assembled from
///
/// Built from configuration by the binary; tests substitute their own.
pub struct Components {
    pub cache_store: Arc<dyn CacheStore>,
    pub limiter_storage: Option<Arc<dyn RateLimitStorage>>,
    pub instrumentation: Arc<dyn Instrumentation>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl Components {
    /// Select cache and limiter backends as configured
    ///
    /// Both share one lazily connecting Redis handle when either uses Redis.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let redis = if config.uses_redis() {
            Some(Arc::new(RedisConnection::new(
                &config.cache.redis_url,
                config.cache.operation_timeout,
            )?))
        } else {
            None
        };
        let shared_connection = || {
            redis
                .clone()
                .ok_or_else(|| GatewayError::config("Redis backend selected without a Redis URL"))
        };

        let cache_store: Arc<dyn CacheStore> = match config.cache.backend {
            StoreBackend::Redis => Arc::new(RedisCache::new(shared_connection()?)),
            StoreBackend::Memory => Arc::new(InMemoryCache::new()),
        };

        let limiter_storage: Option<Arc<dyn RateLimitStorage>> = if config.rate_limit.enabled {
            Some(match config.rate_limit.backend {
                StoreBackend::Redis => Arc::new(RedisStorage::new(shared_connection()?)),
                StoreBackend::Memory => Arc::new(InMemoryStorage::new()),
            })
        } else {
            None
        };

        Ok(Self {
            cache_store,
            limiter_storage,
            instrumentation: Arc::new(Telemetry::new()),
            metrics_handle: None,
        })
    }

    /// In-process stores only
    pub fn in_memory(instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self {
            cache_store: Arc::new(InMemoryCache::new()),
            limiter_storage: Some(Arc::new(InMemoryStorage::new())),
            instrumentation,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Shared server state
///
/// Everything is immutable after startup; mutable state lives in the stores.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub router: Arc<Router>,
    pub endpoints: Arc<HashMap<String, Arc<CachedEndpoint>>>,
    pub cache: Arc<ResponseCache>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub instrumentation: Arc<dyn Instrumentation>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, components: Components) -> GatewayResult<Self> {
        let instance_id = config.server.instance_id.clone();
        let instrumentation = components.instrumentation;

        let router = Router::from_definitions(&config.routes)?;
        let cache = Arc::new(ResponseCache::new(
            components.cache_store,
            instrumentation.clone(),
            config.cache.ttl,
            config.cache.operation_timeout,
            instance_id.clone(),
        ));

        let limiter = match (config.rate_limit.enabled, components.limiter_storage) {
            (true, Some(storage)) => Some(Arc::new(RateLimiter::new(
                storage,
                &config.rate_limit,
                instance_id.clone(),
                instrumentation.clone(),
            ))),
            (true, None) => {
                return Err(GatewayError::config(
                    "Rate limiting is enabled but no limiter storage was provided",
                ));
            }
            (false, _) => None,
        };

        let client = build_http_client(config.server.upstream_timeout)?;
        let mut endpoints = HashMap::new();
        for route in router.routes() {
            let handler: Arc<dyn EndpointHandler> = match &route.handler {
                HandlerKind::Local { message } => Arc::new(StubHandler::new(message.clone())),
                HandlerKind::Proxy { target } => Arc::new(ProxyHandler::new(
                    client.clone(),
                    target.clone(),
                    route.path.clone(),
                    instance_id.clone(),
                    instrumentation.clone(),
                )),
            };
            debug!(route = %route.span_name(), handler = handler.kind(), "Registered endpoint");
            endpoints.insert(
                route.path.clone(),
                Arc::new(CachedEndpoint::new(
                    route.clone(),
                    handler,
                    cache.clone(),
                    config.cache.validate_method_on_hit,
                )),
            );
        }

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            endpoints: Arc::new(endpoints),
            cache,
            limiter,
            instrumentation,
            metrics_handle: components.metrics_handle,
        })
    }
}

/// Build the axum application for `state`
pub fn build_app(state: GatewayState) -> AxumRouter {
    let mut app: AxumRouter<GatewayState> = AxumRouter::new().route("/health", get(health_check));

    let metrics = &state.config.observability.metrics;
    if metrics.enabled {
        app = app.route(&metrics.endpoint_path, get(render_metrics));
    }

    app.fallback(dispatch_request)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
                .layer(middleware::from_fn(attach_trace_id)),
        )
        .with_state(state)
}

/// Resolve the trace id once per request and echo it on the response
async fn attach_trace_id(mut request: Request, next: Next) -> Response {
    let trace_id = resolve_trace_id(&Span::current(), request.headers());
    request
        .extensions_mut()
        .insert(TraceIdentifier(trace_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(X_TRACE_ID, value);
    }
    response
}

/// Liveness check
///
/// Requests fail open when the cache store is down, so an unreachable store
/// reports `degraded` while still answering 200.
async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    let (status, cache) = match state.cache.health_check().await {
        Ok(()) => ("healthy", "ok"),
        Err(e) => {
            warn!("Cache store health check failed: {}", e);
            ("degraded", "unavailable")
        }
    };

    Json(json!({
        "status": status,
        "cache": cache,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": state.config.observability.tracing.service_name,
        "instance": state.config.server.instance_id,
        "cache_backend": state.cache.store_name(),
        "rate_limiting": state.limiter.is_some(),
    }))
}

/// Prometheus text exposition
async fn render_metrics(State(state): State<GatewayState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => GatewayError::service_unavailable("metrics", "no recorder installed").into_response(),
    }
}

/// Map a failed body read to 413 when the size limit tripped, 400 otherwise
fn body_read_error(err: axum::Error, limit: usize) -> GatewayError {
    let inner = err.into_inner();
    if inner.downcast_ref::<LengthLimitError>().is_some() {
        GatewayError::payload_too_large(limit)
    } else {
        GatewayError::validation("body", format!("Failed to read request body: {}", inner))
    }
}

/// Entry point for every request that is not a built-in endpoint
pub async fn dispatch_request(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let trace_id = parts
        .extensions
        .get::<TraceIdentifier>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| resolve_trace_id(&Span::current(), &parts.headers));
    let method = parts.method.clone();

    let mut ctx = RequestContext::new(trace_id, client_addr, String::new());
    let result = process(&state, &mut ctx, parts, body).await;

    let response = match result {
        Ok(served) => served.into_response(),
        Err(err) => {
            if err.status_code().is_server_error() {
                warn!(route = %ctx.route, trace_id = %ctx.trace_id, error = %err, "Request failed");
            } else {
                debug!(route = %ctx.route, trace_id = %ctx.trace_id, error = %err, "Request rejected");
            }
            err.into_response()
        }
    };

    let status = response.status();
    ctx.span.record("http.status_code", status.as_u16());

    let route = if ctx.route.is_empty() {
        UNMATCHED_ROUTE.to_string()
    } else {
        ctx.route.clone()
    };
    let instance = state.config.server.instance_id.clone();
    state.instrumentation.record_counter(
        REQUESTS_TOTAL,
        &[
            ("route", route.clone()),
            ("method", method.to_string()),
            ("status", status.as_u16().to_string()),
            ("instance", instance.clone()),
        ],
    );
    state.instrumentation.record_duration(
        REQUEST_DURATION_SECONDS,
        ctx.elapsed(),
        &[
            ("route", route),
            ("method", method.to_string()),
            ("instance", instance),
        ],
    );

    response
}

/// Classify, admit, then serve through the route's endpoint
async fn process(
    state: &GatewayState,
    ctx: &mut RequestContext,
    parts: Parts,
    body: Body,
) -> GatewayResult<EndpointResponse> {
    let route = state.router.classify(parts.uri.path())?;
    ctx.route = route.path.clone();

    let endpoint = state.endpoints.get(&route.path).cloned().ok_or_else(|| {
        GatewayError::internal(format!("No endpoint registered for route '{}'", route.path))
    })?;

    if let Some(limiter) = &state.limiter {
        let identity = limiter.identity(&ctx.client_addr, &route.path);
        let decision = limiter.check(&identity, &route.path).await?;
        if !decision.allowed {
            return Err(rate_limit_exceeded(limiter.policy(), &decision));
        }
        ctx.client_identity = Some(identity);
    }

    ctx.span = state.instrumentation.start_span(&route.span_name());
    if let Some(identity) = &ctx.client_identity {
        ctx.span.record("client.identity", identity.as_str());
    }

    let span = ctx.span.clone();
    let ctx: &RequestContext = ctx;
    let max_body_size = state.config.server.max_body_size;

    async move {
        let body = axum::body::to_bytes(body, max_body_size)
            .await
            .map_err(|e| body_read_error(e, max_body_size))?;

        let request = InboundRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            client_addr: ctx.client_addr.clone(),
        };
        endpoint.serve(&request, ctx).await
    }
    .instrument(span)
    .await
}

fn rate_limit_exceeded(policy: &RateLimitPolicy, decision: &RateDecision) -> GatewayError {
    let retry_after_ms = decision.reset_after.as_millis();
    let retry_after_secs = u64::try_from(retry_after_ms.div_ceil(1000))
        .unwrap_or(u64::MAX)
        .max(1);

    GatewayError::RateLimitExceeded {
        limit: policy.limit(),
        window: humantime::format_duration(policy.period).to_string(),
        retry_after_secs,
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// HTTP server for the gateway
pub struct GatewayServer {
    state: GatewayState,
    app: AxumRouter,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, components: Components) -> GatewayResult<Self> {
        let state = GatewayState::new(config, components)?;
        let app = build_app(state.clone());
        Ok(Self { state, app })
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Bind, serve until `shutdown` resolves, then drain in-flight requests
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = &self.state.config.server;
        let listener = TcpListener::bind((server.bind_address.as_str(), server.port))
            .await
            .map_err(|e| {
                GatewayError::internal(format!(
                    "Failed to bind gateway server to {}:{}: {}",
                    server.bind_address, server.port, e
                ))
            })?;

        let local_addr = listener.local_addr()?;
        info!("🌐 Gateway listening on {}", local_addr);
        info!(
            "📋 {} routes, cache backend '{}', rate limiting {}",
            self.state.router.routes().len(),
            self.state.cache.store_name(),
            if self.state.limiter.is_some() { "enabled" } else { "disabled" }
        );

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}
