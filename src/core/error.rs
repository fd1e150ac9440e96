//! # Error Handling Module
//!
//! This module defines every error the gateway can surface to a client, using the
//! `thiserror` crate, together with the HTTP status code each one maps to.
//!
//! ## How errors flow through the gateway
//!
//! Subsystems keep their own error enums (`CacheError` in [`crate::caching`],
//! `RateLimitError` in [`crate::middleware::rate_limiting`]). Those are converted
//! into [`GatewayError`] only at the point where they become client-visible:
//!
//! - cache errors are never client-visible (the cache fails open), so they are
//!   logged and counted but never converted,
//! - rate limiter errors fail closed and become [`GatewayError::RateLimiterUnavailable`],
//! - upstream errors become [`GatewayError::ServiceUnavailable`] or
//!   [`GatewayError::BadGateway`].
//!
//! Handlers return `GatewayResult<T>` and use the `?` operator; axum turns the
//! error into a JSON response through the `IntoResponse` implementation below:
//!
//! ```json
//! { "error": { "code": 429, "message": "...", "type": "rate_limit_exceeded" } }
//! ```

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the ticketing gateway
///
/// Each variant represents a category of failure. The `#[error("...")]`
/// attribute generates the `Display` implementation used in the response body.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No route is registered for the request path
    #[error("No route found for path: {path}")]
    RouteNotFound { path: String },

    /// The route exists but does not accept the request method
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// The client exhausted its quota for the current window
    #[error("Rate limit exceeded: {limit} requests per {window}")]
    RateLimitExceeded {
        limit: u32,
        window: String,
        retry_after_secs: u64,
    },

    /// The shared counter store could not be consulted; requests are rejected
    #[error("Rate limiter unavailable: {reason}")]
    RateLimiterUnavailable { reason: String },

    /// Upstream service is unavailable or unreachable
    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// Upstream answered but its response could not be relayed
    #[error("Bad gateway: {service} - {reason}")]
    BadGateway { service: String, reason: String },

    /// Request body exceeded the configured size limit
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Request validation errors (malformed input, unreadable body)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// A response could not be serialized
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, listener binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when building upstream requests
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a route-not-found error for the given path
    pub fn route_not_found<S: Into<String>>(path: S) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create a method-not-allowed error
    pub fn method_not_allowed<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Create a rate limiter unavailable error
    pub fn limiter_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::RateLimiterUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>>(service: S, reason: S) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a bad gateway error
    pub fn bad_gateway<S: Into<String>>(service: S, reason: S) -> Self {
        Self::BadGateway {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an encoding error with a custom message
    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create a validation error for a named field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a payload-too-large error for the given byte limit
    pub fn payload_too_large(limit: usize) -> Self {
        Self::PayloadTooLarge { limit }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RateLimiterUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::Encoding { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::RateLimiterUnavailable { .. } => "rate_limiter_unavailable",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::BadGateway { .. } => "bad_gateway",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::Encoding { .. } => "encoding_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }
}

/// Implement conversion from Infallible for middleware compatibility
impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Render the error as a JSON body with the mapped status code.
///
/// Rate limit rejections additionally carry a `Retry-After` header.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        let mut response = (status, Json(error_response)).into_response();
        if let Self::RateLimitExceeded {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convenience macro for creating internal errors
///
/// Usage: `internal_error!("Failed to process request: {}", request_id)`
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::core::error::GatewayError::internal(format!($($arg)*))
    };
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid port: {}", port)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::GatewayError::config(format!($($arg)*))
    };
}
