//! Storage collaborator seam.
//!
//! The pipeline treats publication as an opaque side effect: hand over a local
//! file and a key, get back a public locator. Durable object storage lives
//! behind this trait; [`DirStore`] is the filesystem implementation used by
//! the CLI and tests.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::info;

use crate::error::FuseResult;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish the file at `path` under `key` and return its public locator.
    async fn put(&self, path: &Path, key: &str) -> FuseResult<String>;
}

/// Copies artifacts into a served directory and returns `base_url/key`.
pub struct DirStore {
    root: PathBuf,
    base_url: String,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for DirStore {
    async fn put(&self, path: &Path, key: &str) -> FuseResult<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create store directory '{}'", self.root.display()))?;
        let dest = self.root.join(key);
        tokio::fs::copy(path, &dest)
            .await
            .with_context(|| format!("publish artifact to '{}'", dest.display()))?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        info!(key, url = %url, "published artifact");
        Ok(url)
    }
}
