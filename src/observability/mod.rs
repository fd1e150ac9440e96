// Logging, tracing and metrics configuration
pub mod config;

// Instrumentation interface used by the request pipeline
pub mod instrumentation;

// Structured logging
pub mod logging;

// Prometheus recorder and metric names
pub mod metrics;

// Distributed tracing
pub mod tracing;

pub use config::{ExporterConfig, LogConfig, LogFormat, MetricsConfig, ObservabilityConfig, TracingConfig};
pub use instrumentation::{Instrumentation, Label, RecordingInstrumentation, Telemetry};
