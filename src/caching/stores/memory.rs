//! # In-Memory Cache Store
//!
//! Process-local cache backed by a `DashMap`. Expired entries are dropped when
//! read, and swept in bulk once the map grows past its soft capacity.

use super::{CacheEntry, CacheStore};
use crate::caching::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// Entry count above which a write first sweeps expired entries
const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// In-memory cache implementation
#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    sweep_threshold: usize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_threshold,
        }
    }

    /// Insert a prepared entry as-is, including one that is already expired
    pub fn insert_entry<K: Into<String>>(&self, key: K, entry: CacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        // The read guard is released by now; removing under it would deadlock
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        if self.entries.len() >= self.sweep_threshold {
            self.purge_expired();
        }
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
