//! Local artifact cache for downloaded maintenance scripts and modules.
//!
//! Artifacts are keyed by their logical repository-relative path and stored
//! under `<root>/artifacts/` with their original layout. Per-artifact
//! metadata (content digest, size, cached-at, expires-at) lives in a SQLite
//! database next to the artifact tree.
//!
//! Freshness and integrity are deliberately separate predicates: a file can
//! be fresh-by-time yet corrupted on disk, or expired yet byte-identical to
//! a re-fetch. `is_stale` answers the first question, `verify_integrity`
//! the second.

mod metadata;

pub use metadata::{EntryRow, MetadataStore};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Durable, verifiable storage for catalog artifacts.
pub struct ArtifactCache {
    artifacts_dir: PathBuf,
    ttl: Duration,
    meta: MetadataStore,
}

impl ArtifactCache {
    /// Opens the cache rooted at `root`, creating the artifact tree and
    /// metadata database as needed.
    pub fn open<P: AsRef<Path>>(root: P, ttl: Duration) -> Result<Self> {
        let root = root.as_ref();
        let artifacts_dir = root.join("artifacts");
        fs::create_dir_all(&artifacts_dir).with_context(|| {
            format!(
                "Failed to create cache directory: {}",
                artifacts_dir.display()
            )
        })?;

        let meta = MetadataStore::open(root.join("metadata.db"))?;

        Ok(Self {
            artifacts_dir,
            ttl,
            meta,
        })
    }

    /// Writes `content` under the key's deterministic local path and upserts
    /// its metadata row. Same-key writes overwrite; disk and metadata errors
    /// propagate.
    pub fn store(&self, key: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        // Write atomically: temp file in the same directory, then rename
        let temp_name = format!(
            "{}.tmp.{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string()),
            std::process::id()
        );
        let temp_path = path.with_file_name(temp_name);
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content).context("Failed to write artifact")?;
        file.sync_all().context("Failed to sync artifact")?;
        fs::rename(&temp_path, &path).context("Failed to rename temp file")?;

        let now = current_timestamp();
        let row = EntryRow {
            key: key.to_string(),
            local_path: path.to_string_lossy().into_owned(),
            sha256: digest_hex(content),
            size_bytes: content.len() as i64,
            cached_at: now,
            expires_at: now + self.ttl.as_secs() as i64,
        };
        self.meta.upsert(&row)?;

        debug!(
            operation = "cache.store",
            key,
            size_bytes = content.len(),
            "artifact cached"
        );

        Ok(path)
    }

    /// Cheap presence probe: the local path when the underlying file exists.
    /// Never consults metadata or staleness.
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        let path = self.path_for(key).ok()?;
        path.is_file().then_some(path)
    }

    /// True when the artifact is absent, has no metadata row, or has outlived
    /// its TTL. Metadata read errors count as stale: fail toward re-fetch,
    /// never toward serving unverified content.
    pub fn is_stale(&self, key: &str) -> bool {
        if self.resolve(key).is_none() {
            return true;
        }
        match self.meta.get(key) {
            Ok(Some(row)) => current_timestamp() > row.expires_at,
            Ok(None) => true,
            Err(e) => {
                debug!(
                    operation = "cache.is_stale",
                    key,
                    error = %e,
                    "metadata read failed, treating as stale"
                );
                true
            }
        }
    }

    /// Recomputes the digest of the on-disk bytes and compares it with the
    /// stored digest. Mismatch, missing file, and missing metadata all
    /// answer `false`, never an error.
    pub fn verify_integrity(&self, key: &str) -> bool {
        let Some(path) = self.resolve(key) else {
            return false;
        };
        let Ok(bytes) = fs::read(&path) else {
            return false;
        };
        match self.meta.get(key) {
            Ok(Some(row)) => digest_hex(&bytes) == row.sha256,
            _ => false,
        }
    }

    /// Deletes every cached file and all metadata. Best-effort per file; a
    /// single failure never aborts the sweep.
    pub fn clear_all(&self) {
        for entry in WalkDir::new(&self.artifacts_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(
                    operation = "cache.clear",
                    path = %entry.path().display(),
                    error = %e,
                    "failed to delete cached file"
                );
            }
        }

        if let Err(e) = self.meta.clear() {
            warn!(operation = "cache.clear", error = %e, "failed to clear cache metadata");
        }
    }

    /// Deletes only artifacts whose metadata says they have expired, then
    /// their metadata rows. Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = current_timestamp();
        let expired = match self.meta.expired_before(now) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(operation = "cache.sweep", error = %e, "failed to scan expired entries");
                return 0;
            }
        };

        let mut removed = 0;
        for row in expired {
            let path = Path::new(&row.local_path);
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(
                        operation = "cache.sweep",
                        key = %row.key,
                        error = %e,
                        "failed to delete expired artifact, keeping its metadata for the next sweep"
                    );
                    continue;
                }
            }
            if let Err(e) = self.meta.delete(&row.key) {
                warn!(operation = "cache.sweep", key = %row.key, error = %e, "failed to delete metadata row");
                continue;
            }
            removed += 1;
        }

        debug!(operation = "cache.sweep", removed, "expiration sweep complete");
        removed
    }

    /// Total bytes on disk under the artifact tree; 0 when the tree is absent.
    pub fn total_bytes(&self) -> u64 {
        WalkDir::new(&self.artifacts_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Number of cached files; 0 when the tree is absent.
    pub fn file_count(&self) -> usize {
        WalkDir::new(&self.artifacts_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    /// Maps a logical key onto the local artifact tree. Keys must be clean
    /// relative paths; absolute paths and parent-directory escapes are
    /// rejected.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid cache key: {key}");
        }
        Ok(self.artifacts_dir.join(rel))
    }

    #[cfg(test)]
    pub(crate) fn metadata(&self) -> &MetadataStore {
        &self.meta
    }
}

fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
