//! # Ticketing API Gateway - Core Library Crate
//!
//! The gateway sitting in front of the ticketing backends. Every request on a
//! configured route goes through the same pipeline:
//!
//! ```text
//! classify path -> rate limiter -> fingerprint -> cache lookup
//!     hit  -> cached body
//!     miss -> method check -> local stub | reverse proxy -> cache write-back
//! ```
//!
//! ## Failure model
//! - The response cache fails **open**: an unreachable store is a miss.
//! - The rate limiter fails **closed**: an unreachable counter store rejects
//!   the request with 500.
//! - Backends are never retried: connection failures are 503, unreadable
//!   responses 502.
//!
//! ## Shared state
//! Cache entries and rate-limit windows live in Redis so that every gateway
//! instance sees the same data. The process itself only holds immutable
//! configuration and connection handles, shared between request tasks through
//! [`gateway::GatewayState`].

/// Error types, configuration, shared request/response types and the Redis handle
pub mod core;

/// Cache key derivation, cache stores and the fail-open response cache
pub mod caching;

/// Admission control in front of the request pipeline
pub mod middleware;

/// Path classification with a radix tree
pub mod routing;

/// Endpoint pipeline, handlers and the HTTP server that ties the other modules together
pub mod gateway;

/// Logging, OpenTelemetry tracing and Prometheus metrics
pub mod observability;

// Re-export the types most callers need

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{HandlerResponse, InboundRequest, RateDecision, RequestContext};

pub use caching::{derive_key, CacheKey, ResponseCache};
pub use middleware::rate_limiting::RateLimiter;
pub use routing::{Route, Router};

/// Primary entry points for running the gateway
pub use gateway::{build_app, Components, GatewayServer, GatewayState};
