//! Shared Redis handle used by the response cache and the rate limiter.
//!
//! The connection is established lazily on first use so the gateway can start
//! while Redis is still coming up: the cache then degrades to misses and the
//! limiter rejects requests until a connection succeeds.

use crate::core::error::{GatewayError, GatewayResult};
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, RedisResult};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct RedisConnection {
    url: String,
    client: Client,
    manager: RwLock<Option<ConnectionManager>>,
    connect_timeout: Duration,
}

impl RedisConnection {
    /// Create a handle for `url` without connecting
    pub fn new(url: &str, connect_timeout: Duration) -> GatewayResult<Self> {
        let client = Client::open(url)
            .map_err(|e| GatewayError::config(format!("Invalid Redis URL '{}': {}", url, e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
            manager: RwLock::new(None),
            connect_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get a connection, connecting first if needed
    ///
    /// `ConnectionManager` is a cheap clone over one multiplexed connection and
    /// reconnects by itself once established.
    pub async fn connection(&self) -> RedisResult<ConnectionManager> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut slot = self.manager.write().await;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let connect = ConnectionManager::new(self.client.clone());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(manager)) => {
                info!("🔗 Connected to Redis at {}", self.url);
                *slot = Some(manager.clone());
                Ok(manager)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to connect to Redis at {}", self.url);
                Err(e)
            }
            Err(_) => {
                warn!("Timed out connecting to Redis at {}", self.url);
                Err(RedisError::from((
                    ErrorKind::IoError,
                    "timed out connecting to redis",
                )))
            }
        }
    }

    /// Round-trip a PING
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
