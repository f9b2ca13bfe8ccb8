use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete tooldeck configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TooldeckConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// Back-office data endpoint used by the connectivity pre-flight check
    #[serde(default)]
    pub endpoint: Option<EndpointConfig>,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Local artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory path
    pub dir: String,

    /// Time-to-live for cached artifacts (e.g., "7d", "24h", "30m")
    #[serde(default = "default_ttl")]
    pub ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: ".tooldeck/cache".to_string(),
            ttl: default_ttl(),
        }
    }
}

/// Interpreter used to run maintenance scripts.
///
/// The defaults target PowerShell with a per-process execution policy.
/// Tests and non-PowerShell deployments override `program` and the
/// argument lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Preferred (modern) interpreter binary
    pub program: String,

    /// Legacy interpreter to fall back to when the preferred one is absent
    #[serde(default)]
    pub fallback: Option<String>,

    /// Arguments placed before the script path
    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,

    /// Arguments that make the interpreter print its version and exit
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "pwsh".to_string(),
            fallback: Some("powershell".to_string()),
            args: default_interpreter_args(),
            version_args: default_version_args(),
        }
    }
}

/// Data endpoint reachability target (host + port, nothing else)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

/// Remote script catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog REST API
    pub url: String,

    /// Request timeout (e.g., "30s")
    #[serde(default = "default_catalog_timeout")]
    pub timeout: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8720".to_string(),
            timeout: default_catalog_timeout(),
        }
    }
}

fn default_ttl() -> String {
    "7d".to_string()
}

fn default_catalog_timeout() -> String {
    "30s".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    [
        "-NoProfile",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Bypass",
        "-File",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_version_args() -> Vec<String> {
    [
        "-NoProfile",
        "-Command",
        "$PSVersionTable.PSVersion.ToString()",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl TooldeckConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Cache TTL as a duration
    pub fn cache_ttl(&self) -> Result<Duration> {
        parse_ttl(&self.cache.ttl).map(Duration::from_secs)
    }

    /// Catalog request timeout as a duration
    pub fn catalog_timeout(&self) -> Result<Duration> {
        parse_ttl(&self.catalog.timeout).map(Duration::from_secs)
    }
}

/// Parse a TTL string (e.g., "7d", "24h", "30m", "45s") into seconds
pub fn parse_ttl(ttl_str: &str) -> Result<u64> {
    let ttl_str = ttl_str.trim().to_lowercase();

    if let Some(num) = ttl_str.strip_suffix('d') {
        let num: u64 = num.trim().parse().context("Invalid TTL number")?;
        Ok(num * 24 * 60 * 60)
    } else if let Some(num) = ttl_str.strip_suffix('h') {
        let num: u64 = num.trim().parse().context("Invalid TTL number")?;
        Ok(num * 60 * 60)
    } else if let Some(num) = ttl_str.strip_suffix('m') {
        let num: u64 = num.trim().parse().context("Invalid TTL number")?;
        Ok(num * 60)
    } else if let Some(num) = ttl_str.strip_suffix('s') {
        let num: u64 = num.trim().parse().context("Invalid TTL number")?;
        Ok(num)
    } else {
        // Assume seconds
        ttl_str.parse().context("Invalid TTL format")
    }
}
