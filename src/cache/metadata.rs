//! SQLite-backed metadata store for cached artifacts.
//!
//! One row per cache key. The schema supports the two access patterns the
//! cache needs: upsert-by-key on every store, and range scans over
//! `expires_at` for the expiration sweep. Timestamps are Unix epoch seconds.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Metadata row for one cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    /// Logical repository-relative path (the cache key)
    pub key: String,
    /// Local storage path of the cached file
    pub local_path: String,
    /// SHA-256 of the bytes as cached, hex-encoded
    pub sha256: String,
    /// Size of the cached content in bytes
    pub size_bytes: i64,
    /// Unix timestamp the artifact was cached at
    pub cached_at: i64,
    /// Unix timestamp the artifact expires at
    pub expires_at: i64,
}

/// Metadata store with one implicit transaction per operation.
///
/// Concurrent cache operations serialize on the connection mutex; there is
/// no cross-operation locking on top of that. Key overwrites are
/// last-writer-wins.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Opens or creates the metadata database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!(
                "Failed to open cache metadata database: {}",
                path.as_ref().display()
            )
        })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                 key        TEXT PRIMARY KEY,
                 local_path TEXT NOT NULL,
                 sha256     TEXT NOT NULL,
                 size_bytes INTEGER NOT NULL,
                 cached_at  INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_artifacts_expires_at
                 ON artifacts (expires_at);",
        )
        .context("Failed to initialize cache metadata schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                 key        TEXT PRIMARY KEY,
                 local_path TEXT NOT NULL,
                 sha256     TEXT NOT NULL,
                 size_bytes INTEGER NOT NULL,
                 cached_at  INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_artifacts_expires_at
                 ON artifacts (expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache metadata lock poisoned: {e}"))
    }

    /// Inserts or replaces the row for `row.key`.
    pub fn upsert(&self, row: &EntryRow) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO artifacts (key, local_path, sha256, size_bytes, cached_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                 local_path = excluded.local_path,
                 sha256     = excluded.sha256,
                 size_bytes = excluded.size_bytes,
                 cached_at  = excluded.cached_at,
                 expires_at = excluded.expires_at",
            params![
                row.key,
                row.local_path,
                row.sha256,
                row.size_bytes,
                row.cached_at,
                row.expires_at
            ],
        )
        .with_context(|| format!("Failed to upsert metadata for key: {}", row.key))?;
        Ok(())
    }

    /// Point lookup by cache key.
    pub fn get(&self, key: &str) -> Result<Option<EntryRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, local_path, sha256, size_bytes, cached_at, expires_at
             FROM artifacts WHERE key = ?1",
        )?;
        let row = stmt
            .query_row(params![key], row_to_entry)
            .optional()
            .with_context(|| format!("Failed to read metadata for key: {key}"))?;
        Ok(row)
    }

    /// Deletes the row for `key`; absent keys are a no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM artifacts WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete metadata for key: {key}"))?;
        Ok(())
    }

    /// Rows whose `expires_at` is strictly before `now`.
    pub fn expired_before(&self, now: i64) -> Result<Vec<EntryRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, local_path, sha256, size_bytes, cached_at, expires_at
             FROM artifacts WHERE expires_at < ?1",
        )?;
        let rows = stmt
            .query_map(params![now], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to scan expired metadata rows")?;
        Ok(rows)
    }

    /// Removes every metadata row.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM artifacts", [])
            .context("Failed to clear cache metadata")?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        key: row.get(0)?,
        local_path: row.get(1)?,
        sha256: row.get(2)?,
        size_bytes: row.get(3)?,
        cached_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}
