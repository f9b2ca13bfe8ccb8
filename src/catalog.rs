//! Remote script catalog access.
//!
//! The launcher only needs one capability from the catalog: raw content
//! for a repository-relative path. Manifest structure, versioning, and
//! authentication live on the server side of this seam.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CatalogConfig;

/// Fetch capability consumed by the launcher.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Downloads the raw content of a repository-relative path.
    async fn fetch(&self, relative_path: &str) -> Result<Vec<u8>>;
}

/// HTTP client for the back-office catalog REST API.
pub struct HttpCatalog {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build catalog HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpCatalog {
    async fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/repository/{}", self.base_url, relative_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Catalog request failed: {url}"))?;

        if !response.status().is_success() {
            bail!(
                "Catalog returned {} for {}",
                response.status(),
                relative_path
            );
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read catalog response body: {url}"))?;

        tracing::debug!(
            operation = "catalog.fetch",
            key = relative_path,
            size_bytes = bytes.len(),
            "artifact downloaded"
        );

        Ok(bytes.to_vec())
    }
}
