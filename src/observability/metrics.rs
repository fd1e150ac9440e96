//! # Metrics
//!
//! Metric names emitted by the gateway and installation of the Prometheus
//! recorder that backs the `/metrics` endpoint.
//!
//! | Metric | Kind | Labels |
//! |---|---|---|
//! | `cache_hits_total` | counter | endpoint, instance |
//! | `cache_misses_total` | counter | endpoint, instance |
//! | `cache_errors_total` | counter | endpoint, instance, op |
//! | `rate_limit_decisions_total` | counter | route, instance, outcome |
//! | `gateway_requests_total` | counter | route, method, status, instance |
//! | `gateway_request_duration_seconds` | histogram | route, method, instance |
//! | `gateway_upstream_request_duration_seconds` | histogram | route, instance |

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::core::error::{GatewayError, GatewayResult};

pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "rate_limit_decisions_total";
pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_request_duration_seconds";

/// Latency buckets in seconds, from cache hits up to slow upstreams
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the global Prometheus recorder and return the handle used to render it
///
/// Can only succeed once per process.
pub fn install_prometheus() -> GatewayResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| GatewayError::internal(format!("Failed to set histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| GatewayError::internal(format!("Failed to install Prometheus recorder: {}", e)))
}
