//! Cache-aside pipeline for one route.
//!
//! Runs inside the route span after admission control:
//! fingerprint, cache lookup, method check, handler, write-back.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

use crate::caching::{ResponseCache, RouteKeyGenerator};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{HandlerResponse, InboundRequest, RequestContext};
use crate::gateway::handlers::EndpointHandler;
use crate::routing::Route;

/// Response header reporting whether the body came from the cache
pub const X_CACHE: &str = "x-cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Handler output tagged with its cache provenance
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub response: HandlerResponse,
    pub cache: CacheStatus,
}

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        let mut response = self.response.into_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static(self.cache.as_str()));
        response
    }
}

/// Whether the body is stored as-is; hits are replayed without the
/// original headers, so encoded bodies cannot be served from the cache
fn is_identity_encoded(response: &HandlerResponse) -> bool {
    response
        .headers
        .get(header::CONTENT_ENCODING)
        .map_or(true, |encoding| {
            encoding
                .to_str()
                .map(|value| value.trim().eq_ignore_ascii_case("identity"))
                .unwrap_or(false)
        })
}

pub struct CachedEndpoint {
    route: Arc<Route>,
    keys: RouteKeyGenerator,
    handler: Arc<dyn EndpointHandler>,
    cache: Arc<ResponseCache>,
    validate_method_on_hit: bool,
}

impl CachedEndpoint {
    pub fn new(
        route: Arc<Route>,
        handler: Arc<dyn EndpointHandler>,
        cache: Arc<ResponseCache>,
        validate_method_on_hit: bool,
    ) -> Self {
        let keys = RouteKeyGenerator::new(route.cache_prefix.clone(), route.fingerprint);
        Self {
            route,
            keys,
            handler,
            cache,
            validate_method_on_hit,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    fn check_method(&self, request: &InboundRequest) -> GatewayResult<()> {
        if self.route.matches_method(&request.method) {
            Ok(())
        } else {
            Err(GatewayError::method_not_allowed(
                request.method.to_string(),
                self.route.path.clone(),
            ))
        }
    }

    /// Serve `request`, from the cache when possible
    ///
    /// A hit short-circuits before the method check unless
    /// `validate_method_on_hit` is set, so a body cached for the route's own
    /// method is also returned for other methods with the same fingerprint.
    /// Only 2xx handler responses are written back.
    pub async fn serve(
        &self,
        request: &InboundRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<EndpointResponse> {
        let key = self.keys.generate_key(request);
        ctx.span.record("cache.key", key.as_str());

        if self.validate_method_on_hit {
            self.check_method(request)?;
        }

        if let Some(body) = self.cache.lookup(&key, &self.route.path).await {
            ctx.span.record("cache.hit", true);
            return Ok(EndpointResponse {
                response: HandlerResponse::json(StatusCode::OK, body),
                cache: CacheStatus::Hit,
            });
        }
        ctx.span.record("cache.hit", false);

        self.check_method(request)?;

        let response = self.handler.handle(request, &ctx.span).await?;

        if response.is_success() && is_identity_encoded(&response) {
            // Write failures are logged and counted by the cache itself
            let _ = self
                .cache
                .store(&key, response.body.clone(), self.cache.ttl(), &self.route.path)
                .await;
        } else {
            debug!(
                route = %self.route.path,
                status = response.status.as_u16(),
                "Not caching unsuccessful or encoded response"
            );
        }

        Ok(EndpointResponse {
            response,
            cache: CacheStatus::Miss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CacheStore, InMemoryCache};
    use crate::core::config::FingerprintSource;
    use crate::gateway::handlers::StubHandler;
    use crate::observability::instrumentation::RecordingInstrumentation;
    use crate::observability::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
    use crate::routing::HandlerKind;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing::Span;

    struct CountingHandler {
        calls: AtomicUsize,
        status: StatusCode,
    }

    #[async_trait]
    impl EndpointHandler for CountingHandler {
        async fn handle(
            &self,
            _request: &InboundRequest,
            _span: &Span,
        ) -> GatewayResult<HandlerResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = HandlerResponse::json_message(&format!("call {}", n))?;
            response.status = self.status;
            Ok(response)
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn route(method: Method) -> Arc<Route> {
        Arc::new(Route::new(
            "/events",
            method,
            HandlerKind::Local {
                message: "unused".to_string(),
            },
            FingerprintSource::Query,
            "view_events_",
        ))
    }

    fn request(method: Method, uri: &str) -> InboundRequest {
        InboundRequest {
            method,
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_addr: "10.0.0.1:4000".to_string(),
        }
    }

    fn context() -> RequestContext {
        RequestContext::new("trace".to_string(), "10.0.0.1:4000", "/events")
    }

    fn cache(
        store: Arc<InMemoryCache>,
        recorder: Arc<RecordingInstrumentation>,
    ) -> Arc<ResponseCache> {
        Arc::new(ResponseCache::new(
            store,
            recorder,
            Duration::from_secs(30),
            Duration::from_millis(200),
            "gw-test",
        ))
    }

    #[tokio::test]
    async fn test_miss_then_hit_returns_identical_body() {
        let recorder = RecordingInstrumentation::new();
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
        });
        let endpoint = CachedEndpoint::new(
            route(Method::GET),
            handler.clone(),
            cache(Arc::new(InMemoryCache::new()), recorder.clone()),
            false,
        );

        let first = endpoint
            .serve(&request(Method::GET, "/events?b=2&a=1"), &context())
            .await
            .unwrap();
        let second = endpoint
            .serve(&request(Method::GET, "/events?a=1&b=2"), &context())
            .await
            .unwrap();

        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(first.response.body, second.response.body);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.counter_total(CACHE_MISSES_TOTAL), 1);
        assert_eq!(recorder.counter_total(CACHE_HITS_TOTAL), 1);
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected_and_not_cached() {
        let store = Arc::new(InMemoryCache::new());
        let endpoint = CachedEndpoint::new(
            route(Method::GET),
            Arc::new(StubHandler::new("events")),
            cache(store.clone(), RecordingInstrumentation::new()),
            false,
        );

        let err = endpoint
            .serve(&request(Method::POST, "/events"), &context())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_hit_skips_method_check_unless_configured() {
        let store = Arc::new(InMemoryCache::new());
        let recorder = RecordingInstrumentation::new();
        let lenient = CachedEndpoint::new(
            route(Method::GET),
            Arc::new(StubHandler::new("events")),
            cache(store.clone(), recorder.clone()),
            false,
        );
        let strict = CachedEndpoint::new(
            route(Method::GET),
            Arc::new(StubHandler::new("events")),
            cache(store.clone(), recorder),
            true,
        );

        lenient
            .serve(&request(Method::GET, "/events"), &context())
            .await
            .unwrap();

        let served = lenient
            .serve(&request(Method::POST, "/events"), &context())
            .await
            .unwrap();
        assert_eq!(served.cache, CacheStatus::Hit);

        let err = strict
            .serve(&request(Method::POST, "/events"), &context())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unsuccessful_response_is_not_cached() {
        let store = Arc::new(InMemoryCache::new());
        let endpoint = CachedEndpoint::new(
            route(Method::GET),
            Arc::new(CountingHandler {
                calls: AtomicUsize::new(0),
                status: StatusCode::NOT_FOUND,
            }),
            cache(store.clone(), RecordingInstrumentation::new()),
            false,
        );

        let served = endpoint
            .serve(&request(Method::GET, "/events"), &context())
            .await
            .unwrap();

        assert_eq!(served.response.status, StatusCode::NOT_FOUND);
        assert!(store.is_empty());
        assert!(store.get("view_events_e3b0c44298fc1c14").await.unwrap().is_none());
    }

    struct GzipHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EndpointHandler for GzipHandler {
        async fn handle(
            &self,
            _request: &InboundRequest,
            _span: &Span,
        ) -> GatewayResult<HandlerResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response =
                HandlerResponse::json(StatusCode::OK, Bytes::from_static(b"\x1f\x8b\x08\x00"));
            response
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Ok(response)
        }

        fn kind(&self) -> &'static str {
            "gzip"
        }
    }

    #[tokio::test]
    async fn test_encoded_response_is_not_cached() {
        let store = Arc::new(InMemoryCache::new());
        let handler = Arc::new(GzipHandler {
            calls: AtomicUsize::new(0),
        });
        let endpoint = CachedEndpoint::new(
            route(Method::GET),
            handler.clone(),
            cache(store.clone(), RecordingInstrumentation::new()),
            false,
        );

        let first = endpoint
            .serve(&request(Method::GET, "/events"), &context())
            .await
            .unwrap();
        let second = endpoint
            .serve(&request(Method::GET, "/events"), &context())
            .await
            .unwrap();

        assert_eq!(first.response.headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(second.cache, CacheStatus::Miss);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_identity_encoding_is_cacheable() {
        let mut response = HandlerResponse::json(StatusCode::OK, Bytes::from_static(b"{}"));
        assert!(is_identity_encoded(&response));

        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
        assert!(is_identity_encoded(&response));

        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(!is_identity_encoded(&response));
    }

    #[test]
    fn test_x_cache_header() {
        let response = EndpointResponse {
            response: HandlerResponse::json(StatusCode::OK, Bytes::from_static(b"{}")),
            cache: CacheStatus::Hit,
        }
        .into_response();

        assert_eq!(response.headers().get(X_CACHE).unwrap(), "HIT");
    }
}
