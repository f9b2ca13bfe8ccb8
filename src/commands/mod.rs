pub mod cache;
pub mod doctor;
pub mod preflight;
pub mod run;

use anyhow::Result;

use crate::cache::ArtifactCache;
use crate::config::TooldeckConfig;
use crate::config_discovery;

/// Loads configuration from an explicit path, or discovers it by walking
/// up from the working directory, or falls back to defaults.
pub(crate) fn load_config(config_path: &Option<String>) -> Result<TooldeckConfig> {
    if let Some(path) = config_path {
        return TooldeckConfig::from_file(path);
    }

    match config_discovery::discover_config(&std::env::current_dir()?)? {
        Some(path) => {
            tracing::info!("using config: {}", path.display());
            TooldeckConfig::from_file(&path)
        }
        None => {
            tracing::warn!("no configuration file found, using defaults");
            Ok(TooldeckConfig::default())
        }
    }
}

pub(crate) fn open_cache(config: &TooldeckConfig) -> Result<ArtifactCache> {
    ArtifactCache::open(&config.cache.dir, config.cache_ttl()?)
}
