//! Instrumentation interface injected into every pipeline component.
//!
//! Components never call the metrics or tracing macros directly for their
//! domain signals; they go through [`Instrumentation`] so tests can swap in
//! [`RecordingInstrumentation`] and assert on what was emitted.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{field, Span};

/// A metric label: static key, dynamic value
pub type Label = (&'static str, String);

/// Start spans, count events, record latencies
pub trait Instrumentation: Send + Sync {
    /// Start a span for one request on a route, e.g. `GET /events`
    ///
    /// The span declares `client.identity`, `cache.key`, `cache.hit` and
    /// `http.status_code` as empty fields for later `record` calls.
    fn start_span(&self, name: &str) -> Span;

    /// Increment the counter `name` by one
    fn record_counter(&self, name: &'static str, labels: &[Label]);

    /// Record one observation of `elapsed` in the histogram `name`
    fn record_duration(&self, name: &'static str, elapsed: Duration, labels: &[Label]);
}

fn to_metric_labels(labels: &[Label]) -> Vec<metrics::Label> {
    labels
        .iter()
        .map(|(key, value)| metrics::Label::new(*key, value.clone()))
        .collect()
}

/// Production instrumentation over the `tracing` and `metrics` facades
///
/// Spans flow to the OpenTelemetry layer when tracing is enabled; counters and
/// histograms land in whatever recorder is installed (Prometheus in the binary).
#[derive(Debug, Clone, Default)]
pub struct Telemetry;

impl Telemetry {
    pub fn new() -> Self {
        Self
    }
}

impl Instrumentation for Telemetry {
    fn start_span(&self, name: &str) -> Span {
        tracing::info_span!(
            "gateway_route",
            otel.name = %name,
            otel.kind = "server",
            client.identity = field::Empty,
            cache.key = field::Empty,
            cache.hit = field::Empty,
            http.status_code = field::Empty,
        )
    }

    fn record_counter(&self, name: &'static str, labels: &[Label]) {
        metrics::counter!(name, to_metric_labels(labels)).increment(1);
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration, labels: &[Label]) {
        metrics::histogram!(name, to_metric_labels(labels)).record(elapsed.as_secs_f64());
    }
}

/// In-memory instrumentation that keeps everything it is given
///
/// Series are keyed as `name{k1=v1,k2=v2}` with labels sorted by key.
#[derive(Debug, Default)]
pub struct RecordingInstrumentation {
    counters: DashMap<String, u64>,
    durations: DashMap<String, Vec<Duration>>,
    spans: Mutex<Vec<String>>,
}

impl RecordingInstrumentation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn series_key(name: &str, labels: &[Label]) -> String {
        let mut sorted: Vec<&Label> = labels.iter().collect();
        sorted.sort_by_key(|(key, _)| *key);
        let rendered = sorted
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", name, rendered)
    }

    /// Value of one counter series, 0 if never incremented
    pub fn counter(&self, name: &str, labels: &[Label]) -> u64 {
        self.counters
            .get(&Self::series_key(name, labels))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Sum of a counter across all label sets
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{}{{", name);
        self.counters
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| *entry.value())
            .sum()
    }

    /// Number of observations recorded for a histogram across all label sets
    pub fn duration_count(&self, name: &str) -> usize {
        let prefix = format!("{}{{", name);
        self.durations
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Names of spans started so far, in order
    pub fn spans(&self) -> Vec<String> {
        self.spans.lock().clone()
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn start_span(&self, name: &str) -> Span {
        self.spans.lock().push(name.to_string());
        Telemetry.start_span(name)
    }

    fn record_counter(&self, name: &'static str, labels: &[Label]) {
        *self
            .counters
            .entry(Self::series_key(name, labels))
            .or_insert(0) += 1;
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration, labels: &[Label]) {
        self.durations
            .entry(Self::series_key(name, labels))
            .or_default()
            .push(elapsed);
    }
}
