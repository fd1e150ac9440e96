//! # Distributed Tracing
//!
//! OpenTelemetry wiring for the gateway.
//!
//! ## Key Features
//! - OTLP gRPC export (batched on the tokio runtime, off the request path)
//! - Stdout export for local debugging
//! - W3C `traceparent` extraction from inbound requests and injection into
//!   forwarded ones
//! - Ratio-based sampling that respects the caller's sampling decision

use axum::http::{HeaderMap, Request};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::{TraceContextExt, TraceId, TracerProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler};
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use tracing::{info, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{ExporterConfig, TracingConfig};

/// Header carrying the W3C trace context
pub const TRACEPARENT: &str = "traceparent";

/// Build the tracer described by `config` and register it globally
///
/// Returns `None` when tracing is disabled. The propagator is installed in
/// either case so `traceparent` headers are still honoured.
pub fn init_tracer(config: &TracingConfig) -> GatewayResult<Option<sdktrace::Tracer>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    if !config.enabled {
        info!("Distributed tracing is disabled");
        return Ok(None);
    }

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let sampler = if config.sample_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_rate)
    };
    let trace_config = sdktrace::config()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(sampler)));

    let tracer = match &config.exporter {
        ExporterConfig::Otlp { endpoint } => opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(trace_config)
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| GatewayError::config(format!("Failed to initialize OTLP exporter: {}", e)))?,
        ExporterConfig::Stdout => {
            let provider = sdktrace::TracerProvider::builder()
                .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
                .with_config(trace_config)
                .build();
            let tracer = provider.tracer("ticketing-gateway");
            global::set_tracer_provider(provider);
            tracer
        }
    };

    info!(
        service = %config.service_name,
        exporter = ?config.exporter,
        sample_rate = %config.sample_rate,
        "Distributed tracing initialized with OpenTelemetry"
    );

    Ok(Some(tracer))
}

/// Flush pending spans and shut the global provider down
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Read-only view of axum headers for the OpenTelemetry propagator
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Remote parent context carried by the request headers, if any
pub fn extract_context(headers: &HeaderMap) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Root span for an inbound HTTP request, parented on the caller's trace context
///
/// Used as the `make_span_with` hook of the server's `TraceLayer`.
pub fn make_request_span<B>(request: &Request<B>) -> Span {
    let span = tracing::info_span!(
        "http_request",
        otel.kind = "server",
        http.method = %request.method(),
        http.target = %request.uri(),
    );
    span.set_parent(extract_context(request.headers()));
    span
}

/// Propagation headers (`traceparent`, `tracestate`) for a call made inside `span`
///
/// Empty when no OpenTelemetry layer is recording the span.
pub fn inject_context(span: &Span) -> HashMap<String, String> {
    let context = span.context();
    let mut carrier = HashMap::new();
    global::get_text_map_propagator(|propagator| propagator.inject_context(&context, &mut carrier));
    carrier
}

/// Trace id recorded by OpenTelemetry for `span`
pub fn current_trace_id(span: &Span) -> Option<TraceId> {
    let context = span.context();
    let span_context = context.span().span_context().clone();
    span_context.is_valid().then(|| span_context.trace_id())
}

/// Trace id from a W3C `traceparent` value: `version-traceid-spanid-flags`
pub fn parse_traceparent(value: &str) -> Option<TraceId> {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() != 4 || parts[1].len() != 32 || parts[2].len() != 16 {
        return None;
    }

    let trace_id = TraceId::from_hex(parts[1]).ok()?;
    (trace_id != TraceId::INVALID).then_some(trace_id)
}

/// Trace id to report for a request
///
/// Prefers the id OpenTelemetry assigned to `span`, then the caller's
/// `traceparent`, and finally a fresh random id so every response can be
/// correlated with its logs.
pub fn resolve_trace_id(span: &Span, headers: &HeaderMap) -> String {
    current_trace_id(span)
        .or_else(|| {
            headers
                .get(TRACEPARENT)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_traceparent)
        })
        .map(|id| id.to_string())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}
