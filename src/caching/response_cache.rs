//! Cache-aside facade used by the request pipeline.
//!
//! Lookups never fail from the caller's point of view: a store error or a
//! timed-out operation is logged, counted in `cache_errors_total` and reported
//! as a miss. Writes report their outcome but the pipeline does not act on it.

use super::key_generator::CacheKey;
use super::stores::CacheStore;
use super::{CacheError, CacheResult};
use crate::observability::instrumentation::{Instrumentation, Label};
use crate::observability::metrics::{CACHE_ERRORS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    instrumentation: Arc<dyn Instrumentation>,
    ttl: Duration,
    operation_timeout: Duration,
    instance_id: String,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        instrumentation: Arc<dyn Instrumentation>,
        ttl: Duration,
        operation_timeout: Duration,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            instrumentation,
            ttl,
            operation_timeout,
            instance_id: instance_id.into(),
        }
    }

    /// Default lifetime of stored responses
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn labels(&self, endpoint: &str) -> Vec<Label> {
        vec![
            ("endpoint", endpoint.to_string()),
            ("instance", self.instance_id.clone()),
        ]
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout { operation }),
        }
    }

    /// Look up a cached response body
    ///
    /// Every call counts exactly one hit or one miss for `endpoint`.
    pub async fn lookup(&self, key: &CacheKey, endpoint: &str) -> Option<Bytes> {
        let labels = self.labels(endpoint);

        match self.bounded("get", self.store.get(key.as_str())).await {
            Ok(Some(body)) => {
                debug!(key = %key, endpoint, "Cache hit");
                self.instrumentation.record_counter(CACHE_HITS_TOTAL, &labels);
                Some(body)
            }
            Ok(None) => {
                debug!(key = %key, endpoint, "Cache miss");
                self.instrumentation.record_counter(CACHE_MISSES_TOTAL, &labels);
                None
            }
            Err(e) => {
                warn!(key = %key, endpoint, error = %e, "Cache unavailable, treating as miss");
                let mut error_labels = labels.clone();
                error_labels.push(("op", "get".to_string()));
                self.instrumentation
                    .record_counter(CACHE_ERRORS_TOTAL, &error_labels);
                self.instrumentation.record_counter(CACHE_MISSES_TOTAL, &labels);
                None
            }
        }
    }

    /// Write a response body back under `key`
    pub async fn store(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Duration,
        endpoint: &str,
    ) -> CacheResult<()> {
        let result = self
            .bounded("set", self.store.set(key.as_str(), value, ttl))
            .await;

        match &result {
            Ok(()) => debug!(key = %key, endpoint, ttl = ?ttl, "Cached response"),
            Err(e) => {
                warn!(key = %key, endpoint, error = %e, "Failed to cache response");
                let mut labels = self.labels(endpoint);
                labels.push(("op", "set".to_string()));
                self.instrumentation.record_counter(CACHE_ERRORS_TOTAL, &labels);
            }
        }
        result
    }

    /// Check that the underlying store answers
    pub async fn health_check(&self) -> CacheResult<()> {
        self.bounded("health_check", self.store.health_check()).await
    }
}
