//! # Gateway Pipeline Integration Tests
//!
//! Drive the assembled axum application end to end with in-memory stores:
//! routing, admission control, cache-aside behaviour and error mapping.

mod common;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use ticketing_gateway::gateway::{X_CACHE, X_TRACE_ID};
use ticketing_gateway::observability::metrics::{
    CACHE_ERRORS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, RATE_LIMIT_DECISIONS_TOTAL,
    REQUESTS_TOTAL, REQUEST_DURATION_SECONDS,
};
use ticketing_gateway::observability::RecordingInstrumentation;
use ticketing_gateway::Components;

fn labels(pairs: &[(&'static str, &str)]) -> Vec<(&'static str, String)> {
    pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

#[tokio::test]
async fn test_events_miss_then_hit() {
    let recorder = RecordingInstrumentation::new();
    let server = test_server(local_config(), Components::in_memory(recorder.clone()));

    let first = server.get("/events").add_query_param("city", "paris").await;
    first.assert_status_ok();
    assert_eq!(first.header(X_CACHE), "MISS");
    let body: Value = first.json();
    assert_eq!(body["message"], "List of events for query: city=paris");

    let second = server.get("/events").add_query_param("city", "paris").await;
    second.assert_status_ok();
    assert_eq!(second.header(X_CACHE), "HIT");
    assert_eq!(second.header(header::CONTENT_TYPE), "application/json");
    assert_eq!(first.as_bytes(), second.as_bytes());

    let endpoint = labels(&[("endpoint", "/events"), ("instance", INSTANCE)]);
    assert_eq!(recorder.counter(CACHE_MISSES_TOTAL, &endpoint), 1);
    assert_eq!(recorder.counter(CACHE_HITS_TOTAL, &endpoint), 1);
    assert_eq!(
        recorder.counter(
            REQUESTS_TOTAL,
            &labels(&[
                ("route", "/events"),
                ("method", "GET"),
                ("status", "200"),
                ("instance", INSTANCE),
            ]),
        ),
        2
    );
    assert_eq!(recorder.duration_count(REQUEST_DURATION_SECONDS), 2);
    assert!(recorder.spans().iter().any(|name| name == "GET /events"));
}

#[tokio::test]
async fn test_query_parameter_order_does_not_change_the_key() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let first = server
        .get("/events")
        .add_query_param("b", "2")
        .add_query_param("a", "1")
        .await;
    assert_eq!(first.header(X_CACHE), "MISS");

    let second = server
        .get("/events")
        .add_query_param("a", "1")
        .add_query_param("b", "2")
        .await;
    assert_eq!(second.header(X_CACHE), "HIT");
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let mut config = local_config();
    config.cache.ttl = Duration::from_millis(150);
    let server = test_server(config, Components::in_memory(RecordingInstrumentation::new()));

    let first = server.get("/bookings").add_query_param("user", "42").await;
    assert_eq!(first.header(X_CACHE), "MISS");

    let cached = server.get("/bookings").add_query_param("user", "42").await;
    assert_eq!(cached.header(X_CACHE), "HIT");

    tokio::time::sleep(Duration::from_millis(250)).await;

    let expired = server.get("/bookings").add_query_param("user", "42").await;
    expired.assert_status_ok();
    assert_eq!(expired.header(X_CACHE), "MISS");
}

#[tokio::test]
async fn test_purchase_is_keyed_on_body() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );
    let order = Bytes::from_static(br#"{"event_id":7,"seats":["A1"]}"#);

    let first = server.post("/purchase").bytes(order.clone()).await;
    first.assert_status_ok();
    assert_eq!(first.header(X_CACHE), "MISS");
    let body: Value = first.json();
    assert_eq!(body["message"], "Ticket purchase successful (stub)");

    let repeated = server.post("/purchase").bytes(order).await;
    assert_eq!(repeated.header(X_CACHE), "HIT");

    let other = server
        .post("/purchase")
        .bytes(Bytes::from_static(br#"{"event_id":7,"seats":["B2"]}"#))
        .await;
    assert_eq!(other.header(X_CACHE), "MISS");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let mut config = local_config();
    config.server.max_body_size = 16;
    let server = test_server(config, Components::in_memory(RecordingInstrumentation::new()));

    let response = server
        .post("/purchase")
        .bytes(Bytes::from_static(br#"{"event_id":7,"seats":["A1","A2","A3"]}"#))
        .await;
    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "payload_too_large");
    assert_eq!(body["error"]["code"], 413);

    let small = server.post("/purchase").bytes(Bytes::from_static(b"{}")).await;
    small.assert_status_ok();
}

#[tokio::test]
async fn test_wrong_method_is_405_and_not_cached() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let rejected = server.post("/events").await;
    rejected.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = rejected.json();
    assert_eq!(body["error"]["type"], "method_not_allowed");
    assert_eq!(body["error"]["code"], 405);

    // Same fingerprint as the POST above: nothing may have been stored
    let fresh = server.get("/events").await;
    fresh.assert_status_ok();
    assert_eq!(fresh.header(X_CACHE), "MISS");
}

#[tokio::test]
async fn test_burst_exhaustion_returns_429_until_window_rolls_over() {
    let mut config = local_config();
    config.rate_limit.rate = 3;
    config.rate_limit.burst = 3;
    config.rate_limit.period = Duration::from_millis(300);
    let recorder = RecordingInstrumentation::new();
    let server = test_server(config, Components::in_memory(recorder.clone()));

    for i in 0..3 {
        let response = server.get("/events").add_query_param("n", i).await;
        response.assert_status_ok();
    }

    let limited = server.get("/events").add_query_param("n", 99).await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get(header::RETRY_AFTER).is_some());
    assert!(limited.headers().get(X_CACHE).is_none());
    let body: Value = limited.json();
    assert_eq!(body["error"]["type"], "rate_limit_exceeded");

    // Rejected requests never reach the cache
    assert_eq!(recorder.counter_total(CACHE_MISSES_TOTAL), 3);
    assert_eq!(
        recorder.counter(
            RATE_LIMIT_DECISIONS_TOTAL,
            &labels(&[
                ("route", "/events"),
                ("instance", INSTANCE),
                ("outcome", "rejected"),
            ]),
        ),
        1
    );

    tokio::time::sleep(Duration::from_millis(400)).await;

    let admitted = server.get("/events").add_query_param("n", 100).await;
    admitted.assert_status_ok();
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let mut config = local_config();
    config.rate_limit.enabled = false;
    config.rate_limit.rate = 1;
    config.rate_limit.burst = 1;
    let server = test_server(config, Components::in_memory(RecordingInstrumentation::new()));

    for _ in 0..5 {
        server.get("/events").await.assert_status_ok();
    }
}

#[tokio::test]
async fn test_cache_outage_fails_open() {
    let recorder = RecordingInstrumentation::new();
    let mut components = Components::in_memory(recorder.clone());
    components.cache_store = Arc::new(FailingCacheStore);
    let server = test_server(local_config(), components);

    for _ in 0..2 {
        let response = server.get("/events").add_query_param("city", "lyon").await;
        response.assert_status_ok();
        assert_eq!(response.header(X_CACHE), "MISS");
    }

    assert_eq!(recorder.counter_total(CACHE_MISSES_TOTAL), 2);
    assert_eq!(recorder.counter_total(CACHE_HITS_TOTAL), 0);
    // one failed lookup and one failed write-back per request
    assert_eq!(recorder.counter_total(CACHE_ERRORS_TOTAL), 4);
}

#[tokio::test]
async fn test_limiter_outage_fails_closed() {
    let recorder = RecordingInstrumentation::new();
    let mut components = Components::in_memory(recorder.clone());
    components.limiter_storage = Some(Arc::new(FailingLimiterStorage));
    let server = test_server(local_config(), components);

    let response = server.get("/events").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "rate_limiter_unavailable");

    assert_eq!(recorder.counter_total(CACHE_MISSES_TOTAL), 0);
    assert_eq!(recorder.counter_total(CACHE_HITS_TOTAL), 0);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let recorder = RecordingInstrumentation::new();
    let server = test_server(local_config(), Components::in_memory(recorder.clone()));

    let response = server.get("/tickets").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "route_not_found");
    assert!(response.headers().get(X_TRACE_ID).is_some());

    assert_eq!(
        recorder.counter(
            REQUESTS_TOTAL,
            &labels(&[
                ("route", "unmatched"),
                ("method", "GET"),
                ("status", "404"),
                ("instance", INSTANCE),
            ]),
        ),
        1
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"], "ok");
    assert_eq!(body["instance"], INSTANCE);
    assert_eq!(body["cache_backend"], "memory");
    assert!(response.headers().get(X_TRACE_ID).is_some());
}

#[tokio::test]
async fn test_health_reports_unreachable_cache() {
    let mut components = Components::in_memory(RecordingInstrumentation::new());
    components.cache_store = Arc::new(FailingCacheStore);
    let server = test_server(local_config(), components);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["cache"], "unavailable");
    assert_eq!(body["cache_backend"], "failing");
}

#[tokio::test]
async fn test_inbound_traceparent_becomes_trace_id() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let response = server
        .get("/events")
        .add_header(
            HeaderName::from_static("traceparent"),
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        )
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.header(X_TRACE_ID),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
}

#[tokio::test]
async fn test_trace_id_is_generated_without_traceparent() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let first = server.get("/events").await;
    let second = server.get("/events").await;

    let first_id = first.header(X_TRACE_ID);
    let second_id = second.header(X_TRACE_ID);
    assert_eq!(first_id.len(), 32);
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder_is_unavailable() {
    let server = test_server(
        local_config(),
        Components::in_memory(RecordingInstrumentation::new()),
    );

    let response = server.get("/metrics").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}
