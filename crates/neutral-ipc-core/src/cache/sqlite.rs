//! SQLite-based persistent cache store.

use super::traits::{CacheEntry, CacheStore};
use crate::error::{NeutralError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Persistent render cache.
///
/// Thread-safe via an internal mutex on the connection. Entries optionally
/// expire after a fixed TTL; expired rows are skipped on read and removed
/// by `purge_expired`.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    ttl: Option<Duration>,
}

impl SqliteCache {
    /// Open (or create) a cache database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>, ttl: Option<Duration>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| NeutralError::Io {
                    message: format!("Failed to create cache directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| NeutralError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| NeutralError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::with_connection(conn, ttl)
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory(ttl: Option<Duration>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ttl)
    }

    fn with_connection(conn: Connection, ttl: Option<Duration>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS render_cache (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_render_cache_expires
                ON render_cache(expires_at);
            "#,
        )
        .map_err(|e| NeutralError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| NeutralError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Delete expired rows. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM render_cache WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![timestamp(Utc::now())],
        )?;
        if removed > 0 {
            debug!("Purged {} expired render cache entries", removed);
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM render_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Fixed-width RFC 3339 so that stored timestamps compare as text.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;
        let now = Utc::now();

        let row: Option<(String, String)> = conn
            .query_row(
                r#"
                SELECT body, created_at
                FROM render_cache
                WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
                params![key, timestamp(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| NeutralError::Database {
                message: format!("Failed to query cache entry: {}", e),
                source: Some(e),
            })?;

        Ok(row.map(|(body, created_at)| CacheEntry {
            key: key.to_string(),
            body,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now),
        }))
    }

    fn put(&self, key: &str, body: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now();
        let expires_at = self
            .ttl
            .map(|ttl| timestamp(now + chrono::Duration::from_std(ttl).unwrap_or_default()));

        conn.execute(
            r#"
            INSERT OR REPLACE INTO render_cache (key, body, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![key, body, timestamp(now), expires_at],
        )
        .map_err(|e| NeutralError::Database {
            message: format!("Failed to set cache entry: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
