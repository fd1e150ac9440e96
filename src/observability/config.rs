use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LogConfig,
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `ticketing_gateway=debug,tower_http=info`
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
    pub exporter: ExporterConfig,
    /// Fraction of root spans to sample, 0.0 to 1.0
    pub sample_rate: f64,
}

/// Where finished spans are shipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExporterConfig {
    /// OTLP over gRPC, e.g. a collector on `http://localhost:4317`
    Otlp { endpoint: String },
    /// Pretty-printed spans on stdout, for local debugging
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint_path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "ticketing_gateway=info,tower_http=info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "ticketing-api-gateway".to_string(),
            exporter: ExporterConfig::Otlp {
                endpoint: "http://localhost:4317".to_string(),
            },
            sample_rate: 1.0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_path: "/metrics".to_string(),
        }
    }
}
