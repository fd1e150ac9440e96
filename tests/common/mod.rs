//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use std::time::Duration;

use ticketing_gateway::caching::{CacheError, CacheResult, CacheStore};
use ticketing_gateway::core::config::{
    FingerprintSource, HandlerDefinition, RouteDefinition, StoreBackend,
};
use ticketing_gateway::middleware::rate_limiting::{RateLimitError, RateLimitStorage, WindowCount};
use ticketing_gateway::{build_app, Components, GatewayConfig, GatewayState};

pub const INSTANCE: &str = "gw-test";

pub fn route(
    path: &str,
    method: &str,
    fingerprint: FingerprintSource,
    cache_prefix: &str,
    handler: HandlerDefinition,
) -> RouteDefinition {
    RouteDefinition {
        path: path.to_string(),
        method: method.to_string(),
        fingerprint,
        cache_prefix: cache_prefix.to_string(),
        handler,
    }
}

pub fn local(message: &str) -> HandlerDefinition {
    HandlerDefinition::Local {
        message: message.to_string(),
    }
}

pub fn proxy(url: impl Into<String>) -> HandlerDefinition {
    HandlerDefinition::Proxy { url: url.into() }
}

/// Gateway with in-memory stores and only local handlers
pub fn local_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.instance_id = INSTANCE.to_string();
    config.server.upstream_timeout = Duration::from_secs(2);
    config.cache.backend = StoreBackend::Memory;
    config.rate_limit.backend = StoreBackend::Memory;
    config.rate_limit.rate = 100;
    config.rate_limit.burst = 100;
    config.routes = vec![
        route(
            "/events",
            "GET",
            FingerprintSource::Query,
            "view_events_",
            local("List of events for query: {query}"),
        ),
        route(
            "/bookings",
            "GET",
            FingerprintSource::Query,
            "view_bookings_",
            local("User bookings for query: {query}"),
        ),
        route(
            "/purchase",
            "POST",
            FingerprintSource::Body,
            "purchase_",
            local("Ticket purchase successful (stub)"),
        ),
    ];
    config
}

/// Replace the `/bookings` route with a proxy to `url`
pub fn with_proxied_bookings(mut config: GatewayConfig, url: impl Into<String>) -> GatewayConfig {
    config.routes.retain(|route| route.path != "/bookings");
    config.routes.push(route(
        "/bookings",
        "GET",
        FingerprintSource::Query,
        "view_bookings_",
        proxy(url),
    ));
    config
}

pub fn test_server(config: GatewayConfig, components: Components) -> TestServer {
    let state = GatewayState::new(config, components).unwrap();
    TestServer::new(build_app(state)).unwrap()
}

/// Cache store whose backend is always down
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Bytes>> {
        Err(CacheError::Store {
            message: "connection refused".to_string(),
        })
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Store {
            message: "connection refused".to_string(),
        })
    }

    async fn health_check(&self) -> CacheResult<()> {
        Err(CacheError::Store {
            message: "connection refused".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Counter store whose backend is always down
pub struct FailingLimiterStorage;

#[async_trait]
impl RateLimitStorage for FailingLimiterStorage {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, RateLimitError> {
        Err(RateLimitError::Storage("connection refused".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
