//! In-memory cache store backed by mini-moka.

use super::traits::{CacheEntry, CacheStore};
use crate::error::Result;
use mini_moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Concurrent in-process cache with optional TTL and capacity bound.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Arc<CacheEntry>>,
}

impl MemoryCache {
    pub fn new(max_entries: Option<u64>, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder();
        if let Some(max) = max_entries {
            builder = builder.max_capacity(max);
        }
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            entries: builder.build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(&key.to_string())
            .map(|entry| entry.as_ref().clone()))
    }

    fn put(&self, key: &str, body: &str) -> Result<()> {
        self.entries
            .insert(key.to_string(), Arc::new(CacheEntry::new(key, body)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
