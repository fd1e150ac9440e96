//! # Rate Limiting System
//!
//! Per-client admission control with a fixed-window counter kept in a shared
//! store, so every gateway instance enforces the same quota.
//!
//! ## Algorithm
//! The first request of a window creates the counter and sets its expiry to the
//! window length. Each request increments the counter atomically; requests with
//! `count <= burst` are admitted and `remaining = burst - count`. The window
//! rolls over when the counter key expires.
//!
//! ## Failure mode
//! The limiter fails closed: if the counter store errors or exceeds its
//! operation timeout the request is rejected with a 500, never admitted
//! unchecked.
//!
//! ## Keys
//! `ratelimit:<client-host>:<instance-id>`, with `:<route>` appended when the
//! scope is `per_client_route`. A client address that cannot be parsed is used
//! verbatim as the host.

use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::{RateLimitConfig, RateLimitScope};
use crate::core::error::GatewayError;
use crate::core::redis::RedisConnection;
use crate::core::types::{ClientIdentity, RateDecision};
use crate::observability::instrumentation::Instrumentation;
use crate::observability::metrics::RATE_LIMIT_DECISIONS_TOTAL;

/// Prefix of every counter key
pub const KEY_PREFIX: &str = "ratelimit";

/// Errors that can occur during rate limiting operations
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Counter store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<RateLimitError> for GatewayError {
    fn from(err: RateLimitError) -> Self {
        GatewayError::limiter_unavailable(err.to_string())
    }
}

/// Quota applied to one client identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Nominal sustained rate per period. The fixed window admits `burst`
    /// requests per `period`; `rate` only bounds `burst` from below at
    /// configuration time.
    pub rate: u32,
    /// Requests admitted within one window
    pub burst: u32,
    /// Window length
    pub period: Duration,
}

impl RateLimitPolicy {
    /// Window capacity
    pub fn limit(&self) -> u32 {
        self.burst
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            rate: 10,
            burst: 10,
            period: Duration::from_secs(60),
        }
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            rate: config.rate,
            burst: config.burst,
            period: config.period,
        }
    }
}

/// Counter value after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window's counter expires
    pub reset_after: Duration,
}

/// Storage backend for window counters
#[async_trait]
pub trait RateLimitStorage: Send + Sync {
    /// Atomically increment `key`, starting a new window of length `window`
    /// when the key does not exist
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError>;

    fn name(&self) -> &'static str;
}

/// Counter count above which an increment first sweeps ended windows
const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// In-memory storage implementation
///
/// The `DashMap` entry API holds the shard lock for the whole
/// read-modify-write, so concurrent increments of one key never lose updates.
#[derive(Debug)]
pub struct InMemoryStorage {
    data: DashMap<String, (u64, Instant)>,
    sweep_threshold: usize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        Self {
            data: DashMap::new(),
            sweep_threshold,
        }
    }

    /// Number of tracked counters, ended windows included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop counters whose window has ended
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, (_, expiry)| *expiry > now);
        let removed = before.saturating_sub(self.data.len());
        if removed > 0 {
            debug!("Cleaned up {} expired rate limit windows", removed);
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        if self.data.len() >= self.sweep_threshold {
            self.cleanup_expired();
        }

        let now = Instant::now();
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| (0, now + window));

        let (count, expiry) = entry.value_mut();
        if *expiry <= now {
            *count = 0;
            *expiry = now + window;
        }
        *count += 1;

        Ok(WindowCount {
            count: *count,
            reset_after: expiry.saturating_duration_since(now),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Increment and window expiry in one round trip.
///
/// A counter left without a TTL (e.g. written by an older client) gets the
/// window expiry re-applied so it cannot block a client forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis storage implementation
pub struct RedisStorage {
    connection: Arc<RedisConnection>,
    script: redis::Script,
}

impl RedisStorage {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self {
            connection,
            script: redis::Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl RateLimitStorage for RedisStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let mut conn = self.connection.connection().await?;
        let window_ms = window.as_millis().max(1) as u64;

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Host part of a client address
///
/// `203.0.113.7:51234` and `[2001:db8::1]:443` yield the IP; anything that
/// does not parse is returned unchanged.
pub fn client_host(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string(),
        _ => addr.to_string(),
    }
}

/// Main rate limiter implementation
pub struct RateLimiter {
    storage: Arc<dyn RateLimitStorage>,
    policy: RateLimitPolicy,
    scope: RateLimitScope,
    instance_id: String,
    operation_timeout: Duration,
    instrumentation: Arc<dyn Instrumentation>,
}

impl RateLimiter {
    pub fn new(
        storage: Arc<dyn RateLimitStorage>,
        config: &RateLimitConfig,
        instance_id: impl Into<String>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        Self {
            storage,
            policy: RateLimitPolicy::from(config),
            scope: config.scope,
            instance_id: instance_id.into(),
            operation_timeout: config.operation_timeout,
            instrumentation,
        }
    }

    /// Policy applied by [`RateLimiter::check`]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counter key for a client on a route
    pub fn identity(&self, client_addr: &str, route: &str) -> ClientIdentity {
        let host = client_host(client_addr);
        match self.scope {
            RateLimitScope::PerClient => {
                ClientIdentity::new(format!("{}:{}:{}", KEY_PREFIX, host, self.instance_id))
            }
            RateLimitScope::PerClientRoute => ClientIdentity::new(format!(
                "{}:{}:{}:{}",
                KEY_PREFIX, host, self.instance_id, route
            )),
        }
    }

    /// Count one request against `identity` under `policy`
    pub async fn allow(
        &self,
        identity: &ClientIdentity,
        policy: &RateLimitPolicy,
    ) -> Result<RateDecision, RateLimitError> {
        let increment = self.storage.increment(identity.as_str(), policy.period);
        let window = tokio::time::timeout(self.operation_timeout, increment)
            .await
            .map_err(|_| RateLimitError::Timeout(self.operation_timeout))??;

        let limit = u64::from(policy.limit());
        let remaining = limit.saturating_sub(window.count);

        Ok(RateDecision {
            allowed: window.count <= limit,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_after: window.reset_after,
        })
    }

    /// Admission check for one request on `route`, with logging and metrics
    pub async fn check(
        &self,
        identity: &ClientIdentity,
        route: &str,
    ) -> Result<RateDecision, RateLimitError> {
        let result = self.allow(identity, &self.policy).await;

        let outcome = match &result {
            Ok(decision) if decision.allowed => {
                debug!(identity = %identity, remaining = decision.remaining, "Request admitted");
                "allowed"
            }
            Ok(decision) => {
                debug!(
                    identity = %identity,
                    retry_after = ?decision.reset_after,
                    "Rate limit exceeded"
                );
                "rejected"
            }
            Err(e) => {
                warn!(
                    identity = %identity,
                    store = self.storage.name(),
                    error = %e,
                    "Rate limiter store unavailable, rejecting request"
                );
                "error"
            }
        };

        self.instrumentation.record_counter(
            RATE_LIMIT_DECISIONS_TOTAL,
            &[
                ("route", route.to_string()),
                ("instance", self.instance_id.clone()),
                ("outcome", outcome.to_string()),
            ],
        );

        result
    }
}
