pub mod rate_limiting;

pub use rate_limiting::{
    InMemoryStorage, RateLimitError, RateLimitPolicy, RateLimitStorage, RateLimiter, RedisStorage,
};
