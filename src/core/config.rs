//! # Configuration Module
//!
//! Configuration structures and loading for the ticketing gateway.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Human-readable durations (`30s`, `500ms`, `1m`) via `humantime-serde`
//! - Environment variable overrides for deployment-specific values
//! - Validation that reports every problem at once
//!
//! When no configuration file is present the built-in defaults describe the
//! standard deployment: `/events` and `/bookings` forwarded to their backends,
//! `/purchase` answered locally, Redis on `127.0.0.1:6379`.

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{ExporterConfig, ObservabilityConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";

/// Configuration file used when `GATEWAY_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Paths served by the gateway itself; routes may not claim them
const RESERVED_PATHS: &[&str] = &["/health"];

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and upstream settings
    pub server: ServerConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Admission control settings
    pub rate_limit: RateLimitConfig,

    /// Route table
    pub routes: Vec<RouteDefinition>,

    /// Logging, tracing and metrics settings
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to the built-in defaults
    /// when the file does not exist
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Self::load_from_file(path).await;
        }

        tracing::warn!(
            path = %path.display(),
            "Configuration file not found, using built-in defaults"
        );
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// Recognised variables: `GATEWAY_PORT`, `GATEWAY_BIND_ADDRESS`,
    /// `GATEWAY_INSTANCE_ID`, `GATEWAY_REDIS_URL`, `GATEWAY_OTLP_ENDPOINT`,
    /// `GATEWAY_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PORT: {}", e)))?;
        }

        if let Some(addr) = lookup("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(instance) = lookup("GATEWAY_INSTANCE_ID") {
            self.server.instance_id = instance;
        }

        if let Some(url) = lookup("GATEWAY_REDIS_URL") {
            self.cache.redis_url = url;
        }

        if let Some(endpoint) = lookup("GATEWAY_OTLP_ENDPOINT") {
            self.observability.tracing.exporter = ExporterConfig::Otlp { endpoint };
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        // Server
        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }
        if self.server.instance_id.trim().is_empty() {
            errors.push("server.instance_id cannot be empty".to_string());
        }
        if self.server.max_body_size == 0 {
            errors.push("server.max_body_size must be greater than 0".to_string());
        }
        if self.server.upstream_timeout.is_zero() {
            errors.push("server.upstream_timeout must be greater than 0".to_string());
        }

        // Cache
        if self.cache.ttl.is_zero() {
            errors.push("cache.ttl must be greater than 0".to_string());
        }
        if self.cache.operation_timeout.is_zero() {
            errors.push("cache.operation_timeout must be greater than 0".to_string());
        }

        // Rate limiting
        if self.rate_limit.enabled {
            if self.rate_limit.rate == 0 {
                errors.push("rate_limit.rate must be greater than 0".to_string());
            }
            if self.rate_limit.burst < self.rate_limit.rate {
                errors.push(format!(
                    "rate_limit.burst ({}) must be at least rate_limit.rate ({})",
                    self.rate_limit.burst, self.rate_limit.rate
                ));
            }
            if self.rate_limit.period.is_zero() {
                errors.push("rate_limit.period must be greater than 0".to_string());
            }
            if self.rate_limit.operation_timeout.is_zero() {
                errors.push("rate_limit.operation_timeout must be greater than 0".to_string());
            }
        }

        // Redis is shared by the cache and the limiter
        if self.uses_redis() {
            match Url::parse(&self.cache.redis_url) {
                Ok(url) if matches!(url.scheme(), "redis" | "rediss") => {}
                Ok(url) => errors.push(format!(
                    "cache.redis_url has unsupported scheme '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("cache.redis_url is invalid: {}", e)),
            }
        }

        // Routes
        if self.routes.is_empty() {
            errors.push("At least one route must be configured".to_string());
        }
        let mut seen = HashSet::new();
        for (index, route) in self.routes.iter().enumerate() {
            if route.path.is_empty() {
                errors.push(format!("Route {} has empty path", index));
                continue;
            }
            if !route.path.starts_with('/') {
                errors.push(format!("Route '{}' must start with '/'", route.path));
            }
            if !seen.insert(route.path.as_str()) {
                errors.push(format!("Route '{}' is defined more than once", route.path));
            }
            if RESERVED_PATHS.contains(&route.path.as_str())
                || route.path == self.observability.metrics.endpoint_path
            {
                errors.push(format!("Route '{}' collides with a built-in endpoint", route.path));
            }

            match route.method.to_uppercase().as_str() {
                "GET" | "POST" | "PUT" | "DELETE" | "PATCH" => {}
                _ => errors.push(format!(
                    "Route '{}' has invalid HTTP method: {}",
                    route.path, route.method
                )),
            }

            if route.cache_prefix.is_empty() {
                errors.push(format!("Route '{}' has empty cache_prefix", route.path));
            }

            if let HandlerDefinition::Proxy { url } = &route.handler {
                match Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => errors.push(format!(
                        "Route '{}' proxy url has unsupported scheme '{}'",
                        route.path,
                        parsed.scheme()
                    )),
                    Err(e) => errors.push(format!(
                        "Route '{}' has invalid proxy url '{}': {}",
                        route.path, url, e
                    )),
                }
            }
        }

        // Observability
        let tracing = &self.observability.tracing;
        if !(0.0..=1.0).contains(&tracing.sample_rate) {
            errors.push("observability.tracing.sample_rate must be between 0.0 and 1.0".to_string());
        }
        if tracing.service_name.is_empty() {
            errors.push("observability.tracing.service_name cannot be empty".to_string());
        }
        if let ExporterConfig::Otlp { endpoint } = &tracing.exporter {
            if tracing.enabled && Url::parse(endpoint).is_err() {
                errors.push(format!(
                    "observability.tracing.exporter.endpoint is invalid: {}",
                    endpoint
                ));
            }
        }
        if !self.observability.metrics.endpoint_path.starts_with('/') {
            errors.push("observability.metrics.endpoint_path must start with '/'".to_string());
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Whether any component needs the Redis connection
    pub fn uses_redis(&self) -> bool {
        self.cache.backend == StoreBackend::Redis
            || (self.rate_limit.enabled && self.rate_limit.backend == StoreBackend::Redis)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// Listener port
    pub port: u16,

    /// Identifier of this gateway instance, used in metric labels and limiter keys
    pub instance_id: String,

    /// Maximum accepted request body size in bytes
    pub max_body_size: usize,

    /// Total time allowed for a forwarded request
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            instance_id: "gateway-1".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            upstream_timeout: Duration::from_secs(10),
        }
    }
}

/// Storage backend for the cache and the limiter counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance, required when several gateways run side by side
    Redis,
    /// Process-local storage
    Memory,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: StoreBackend,

    /// Redis connection URL; also used by the rate limiter
    pub redis_url: String,

    /// Lifetime of a cached response
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Upper bound on a single cache operation
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Check the request method before serving a cached response
    pub validate_method_on_hit: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl: Duration::from_secs(30),
            operation_timeout: Duration::from_millis(500),
            validate_method_on_hit: false,
        }
    }
}

/// What a rate limit counter is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One quota per client address and gateway instance
    PerClient,
    /// One quota per client address, gateway instance and route
    PerClientRoute,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: StoreBackend,

    /// Nominal sustained requests per period; must not exceed `burst`.
    /// Admission itself counts `burst` requests per fixed window.
    pub rate: u32,

    /// Requests admitted within one window
    pub burst: u32,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    pub scope: RateLimitScope,

    /// Upper bound on a single counter update
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StoreBackend::Redis,
            rate: 10,
            burst: 10,
            period: Duration::from_secs(60),
            scope: RateLimitScope::PerClient,
            operation_timeout: Duration::from_millis(500),
        }
    }
}

/// Which part of a request identifies it for caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintSource {
    /// Query parameters, canonicalized
    Query,
    /// Raw request body bytes
    Body,
}

/// How a route produces its response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerDefinition {
    /// Answer in-process with `{"message": ...}`; `{query}` in the message is
    /// replaced with the raw query string
    Local { message: String },
    /// Forward to a backend URL
    Proxy { url: String },
}

/// Route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Exact request path
    pub path: String,

    /// Accepted HTTP method
    pub method: String,

    /// Source of the cache fingerprint
    pub fingerprint: FingerprintSource,

    /// Literal prepended to every cache key of this route
    pub cache_prefix: String,

    pub handler: HandlerDefinition,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            routes: vec![
                RouteDefinition {
                    path: "/events".to_string(),
                    method: "GET".to_string(),
                    fingerprint: FingerprintSource::Query,
                    cache_prefix: "view_events_".to_string(),
                    handler: HandlerDefinition::Proxy {
                        url: "http://localhost:8081/events".to_string(),
                    },
                },
                RouteDefinition {
                    path: "/bookings".to_string(),
                    method: "GET".to_string(),
                    fingerprint: FingerprintSource::Query,
                    cache_prefix: "view_bookings_".to_string(),
                    handler: HandlerDefinition::Proxy {
                        url: "http://localhost:8082/bookings".to_string(),
                    },
                },
                RouteDefinition {
                    path: "/purchase".to_string(),
                    method: "POST".to_string(),
                    fingerprint: FingerprintSource::Body,
                    cache_prefix: "purchase_".to_string(),
                    handler: HandlerDefinition::Local {
                        message: "Ticket purchase successful (stub)".to_string(),
                    },
                },
            ],
            observability: ObservabilityConfig::default(),
        }
    }
}
