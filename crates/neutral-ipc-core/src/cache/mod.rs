//! Render cache: eligibility, keys and stores.
//!
//! - `key`: pure verdict (`Disabled` or `Cacheable(key)`) per request
//! - `CacheStore`: storage shared by all connections
//! - `MemoryCache` (mini-moka), `SqliteCache` (persistent), `NoCache`

mod key;
mod memory;
mod sqlite;
mod traits;

pub use key::{evaluate, write_canonical, CacheVerdict};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use traits::{CacheEntry, CacheStore, NoCache};

use crate::config::{CacheBackendKind, CacheSettings};
use crate::{NeutralError, Result};
use std::sync::Arc;

/// Build the store described by `settings`.
pub fn open_store(settings: &CacheSettings) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match settings.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(settings.max_entries, settings.ttl())),
        CacheBackendKind::Sqlite => {
            let path = settings.path.as_ref().ok_or_else(|| NeutralError::Config {
                message: "cache.path is required for the sqlite backend".to_string(),
            })?;
            Arc::new(SqliteCache::new(path, settings.ttl())?)
        }
        CacheBackendKind::None => Arc::new(NoCache),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_store_backends() {
        let memory = open_store(&CacheSettings::default()).unwrap();
        assert_eq!(memory.name(), "memory");

        let none = open_store(&CacheSettings {
            backend: CacheBackendKind::None,
            ..CacheSettings::default()
        })
        .unwrap();
        assert_eq!(none.name(), "none");
    }

    #[test]
    fn test_sqlite_backend_requires_path() {
        let result = open_store(&CacheSettings {
            backend: CacheBackendKind::Sqlite,
            path: None,
            ..CacheSettings::default()
        });
        assert!(matches!(result, Err(NeutralError::Config { .. })));
    }
}
