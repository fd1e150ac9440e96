//! # Cache Stores Module
//!
//! In-memory and Redis-backed implementations of [`CacheStore`].

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use super::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Cache entry with its absolute expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached response body
    pub value: Bytes,

    /// When the entry stops being served
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry expiring `ttl` from now
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Check if the entry is expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time until expiration
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Trait for cache store implementations
///
/// Stores only distinguish "present", "absent" and "failed"; expiry is the
/// store's own responsibility and the gateway never deletes entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache; `Ok(None)` when absent or expired
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<()>;

    /// Store name used in logs and metric labels
    fn name(&self) -> &'static str;
}
