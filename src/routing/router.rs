//! # Router Module
//!
//! Maps a request path to its [`Route`] using the `matchit` radix tree.
//!
//! Routes are built once at startup from the configuration and shared
//! read-only between requests behind `Arc`s. Method checking is deliberately
//! not part of classification: the request pipeline validates the method only
//! after the cache lookup, so a path match alone decides which route handles
//! the request.

use crate::core::config::{FingerprintSource, HandlerDefinition, RouteDefinition};
use crate::core::error::{GatewayError, GatewayResult};
use axum::http::Method;
use matchit::{Match, Router as RadixRouter};
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// How a route produces its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Answer in-process with `{"message": ...}`
    Local { message: String },
    /// Forward to a backend
    Proxy { target: Url },
}

/// Route definition resolved from configuration
#[derive(Debug, Clone)]
pub struct Route {
    /// Exact request path, e.g. `/events`
    pub path: String,

    /// Accepted HTTP method
    pub method: Method,

    pub handler: HandlerKind,

    /// Which part of the request identifies it for caching
    pub fingerprint: FingerprintSource,

    /// Literal prepended to this route's cache keys
    pub cache_prefix: String,
}

impl Route {
    pub fn new(
        path: impl Into<String>,
        method: Method,
        handler: HandlerKind,
        fingerprint: FingerprintSource,
        cache_prefix: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method,
            handler,
            fingerprint,
            cache_prefix: cache_prefix.into(),
        }
    }

    /// Resolve a configured route, parsing its method and backend URL
    pub fn from_definition(definition: &RouteDefinition) -> GatewayResult<Self> {
        let method = Method::from_str(&definition.method.to_uppercase()).map_err(|e| {
            GatewayError::config(format!(
                "Route '{}' has invalid method '{}': {}",
                definition.path, definition.method, e
            ))
        })?;

        let handler = match &definition.handler {
            HandlerDefinition::Local { message } => HandlerKind::Local {
                message: message.clone(),
            },
            HandlerDefinition::Proxy { url } => HandlerKind::Proxy {
                target: Url::parse(url).map_err(|e| {
                    GatewayError::config(format!(
                        "Route '{}' has invalid proxy url '{}': {}",
                        definition.path, url, e
                    ))
                })?,
            },
        };

        Ok(Self::new(
            definition.path.clone(),
            method,
            handler,
            definition.fingerprint,
            definition.cache_prefix.clone(),
        ))
    }

    /// Check if the HTTP method is accepted by this route
    pub fn matches_method(&self, method: &Method) -> bool {
        self.method == *method
    }

    /// Name of the trace span covering this route, e.g. `GET /events`
    pub fn span_name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Path router
pub struct Router {
    /// Radix tree for route matching
    router: RadixRouter<Arc<Route>>,

    /// Registration order, for listing
    routes: Vec<Arc<Route>>,
}

impl Router {
    /// Create a new router
    pub fn new() -> Self {
        Self {
            router: RadixRouter::new(),
            routes: Vec::new(),
        }
    }

    /// Build a router from configured route definitions
    pub fn from_definitions(definitions: &[RouteDefinition]) -> GatewayResult<Self> {
        let mut router = Self::new();
        for definition in definitions {
            router.add_route(Route::from_definition(definition)?)?;
        }
        Ok(router)
    }

    /// Add a route to the router
    pub fn add_route(&mut self, route: Route) -> GatewayResult<()> {
        let path = route.path.clone();
        let route = Arc::new(route);

        self.router
            .insert(path.as_str(), route.clone())
            .map_err(|e| GatewayError::config(format!("Failed to add route '{}': {}", path, e)))?;
        self.routes.push(route);

        Ok(())
    }

    /// Classify a request path into its route
    pub fn classify(&self, path: &str) -> GatewayResult<Arc<Route>> {
        match self.router.at(path) {
            Ok(Match { value, .. }) => Ok(value.clone()),
            Err(_) => Err(GatewayError::route_not_found(path)),
        }
    }

    /// Registered routes in registration order
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
