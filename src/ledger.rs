//! Execution history ledger.
//!
//! The core pipeline does not own history; it hands each outcome to a
//! [`RunLedger`] after the run completes. The bundled implementation
//! appends JSON lines to a local file so the CLI is usable end-to-end;
//! querying and statistics belong to the back-office product.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// One completed run, as recorded for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub tool_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub output: String,
    pub error_output: String,
    pub completed_at: DateTime<Utc>,
}

/// History sink consumed by the launcher.
pub trait RunLedger: Send + Sync {
    fn record(&self, record: &RunRecord) -> Result<()>;
}

/// Append-only JSON-lines ledger on the local filesystem.
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RunLedger for JsonlLedger {
    fn record(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }

        let line = serde_json::to_string(record).context("Failed to serialize run record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger: {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append run record")?;

        Ok(())
    }
}
