//! # Response Caching Module
//!
//! Cache-aside response caching for the gateway's idempotent endpoints.
//!
//! ## Architecture
//! 1. **Key generator**: canonicalizes a request's identifying content into a
//!    fixed-length [`CacheKey`].
//! 2. **Cache stores**: a shared Redis store for production and an in-memory
//!    store for single-process deployments and tests.
//! 3. **Response cache**: the facade the request pipeline talks to. It bounds
//!    every store call with a timeout, records hit/miss/error counters and
//!    treats an unavailable store as a miss.
//!
//! ## Usage Example
//! ```rust,ignore
//! let key = RouteKeyGenerator::new("view_events_", FingerprintSource::Query)
//!     .generate_key(&request);
//!
//! if let Some(body) = cache.lookup(&key, "/events").await {
//!     return Ok(body);
//! }
//! let body = handler.handle(&request).await?.body;
//! let _ = cache.store(&key, body.clone(), cache.ttl(), "/events").await;
//! ```

pub mod key_generator;
pub mod response_cache;
pub mod stores;

pub use key_generator::{canonical_query, derive_key, CacheKey, RouteKeyGenerator};
pub use response_cache::ResponseCache;
pub use stores::{CacheEntry, CacheStore, InMemoryCache, RedisCache};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
///
/// None of these reach the client: the response cache logs and counts them
/// and carries on as if the entry were absent.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation '{operation}' timed out")]
    Timeout { operation: &'static str },
}
