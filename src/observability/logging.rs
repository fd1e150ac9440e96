//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter`, a JSON or text
//! formatter and, when tracing is enabled, the OpenTelemetry layer that turns
//! spans into exported traces.

use opentelemetry_sdk::trace::Tracer;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Build the filter from the configured directive, letting `RUST_LOG` win when set
fn build_filter(level: &str) -> GatewayResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| GatewayError::config(format!("Invalid log level '{}': {}", level, e)))
}

/// Initialize the tracing subscriber
///
/// A second call in the same process keeps the first subscriber and logs a
/// warning, which is what happens when tests share a process.
pub fn init_logging(config: &LogConfig, tracer: Option<Tracer>) -> GatewayResult<()> {
    let filter = build_filter(&config.level)?;

    let json_layer = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });
    let text_layer = (config.format == LogFormat::Text).then(|| fmt::layer().with_target(true));
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let result = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init();

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    Ok(())
}
