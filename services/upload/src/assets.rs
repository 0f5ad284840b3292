use crate::ingest::SpooledFile;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// URL prefix under which local assets are served
pub const ASSETS_ROUTE: &str = "/assets";

/// Locally served assets (thumbnails)
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of an asset
    pub fn url_for(&self, file_name: &str) -> String {
        format!(
            "{}{}/{}",
            self.public_base_url.trim_end_matches('/'),
            ASSETS_ROUTE,
            file_name
        )
    }

    /// Copy a spooled upload into the asset root under `file_name`.
    ///
    /// The spool may live on another filesystem, so this copies rather than
    /// renames; the spool itself stays owned by the caller.
    pub async fn persist(&self, source: &SpooledFile, file_name: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let target = self.root.join(file_name);
        if let Err(e) = tokio::fs::copy(source.path(), &target).await {
            // Partial copy
            if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                warn!(error = %remove_err, path = %target.display(), "Failed to remove partial asset");
            }
            return Err(e);
        }

        debug!(path = %target.display(), "Asset persisted");
        Ok(target)
    }

    /// Best-effort removal, used to roll back after a failed record update
    pub async fn remove(&self, file_name: &str) {
        let target = self.root.join(file_name);
        if let Err(e) = tokio::fs::remove_file(&target).await {
            warn!(error = %e, path = %target.display(), "Failed to remove asset");
        }
    }
}
