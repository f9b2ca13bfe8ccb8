//! Configuration discovery.
//!
//! Finds the nearest `tooldeck.toml` by walking from a starting directory
//! up through its ancestors, so the launcher can be invoked from anywhere
//! inside a back-office deployment tree.

use anyhow::Result;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "tooldeck.toml";

/// Walks `start_dir` and its ancestors, returning the first
/// `tooldeck.toml` found.
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = Some(start_dir);

    while let Some(dir) = current {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
        current = dir.parent();
    }

    Ok(None)
}
