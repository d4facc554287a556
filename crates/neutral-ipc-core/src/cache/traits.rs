//! Cache store trait and types.

use crate::error::Result;
use chrono::{DateTime, Utc};

/// A rendered body stored under its cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Storage for rendered bodies, shared by every connection.
///
/// Writes to the same key are last-writer-wins. Expiry and eviction are
/// the store's own policy. All operations are synchronous to match
/// rusqlite's API.
pub trait CacheStore: Send + Sync {
    /// Fetch an entry. `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store a body, replacing any existing entry.
    fn put(&self, key: &str, body: &str) -> Result<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// A store that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _body: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
