//! # Redis Cache Store
//!
//! Shared cache backed by Redis, so every gateway instance serves the same
//! entries. Expiry is delegated to Redis via `SET ... PX`.

use super::CacheStore;
use crate::caching::CacheResult;
use crate::core::redis::RedisConnection;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Redis cache implementation
#[derive(Debug, Clone)]
pub struct RedisCache {
    connection: Arc<RedisConnection>,
}

impl RedisCache {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.connection().await?;
        // PX takes a positive integer; sub-millisecond TTLs round up
        let ttl_ms = ttl.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!(key = %key, ttl_ms, "Stored response in Redis");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<()> {
        self.connection.ping().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
