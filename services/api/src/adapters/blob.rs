//! services/api/src/adapters/blob.rs
//!
//! Stores uploaded files (profile photos, exam results) on the local disk
//! under `root`, served back by the API under `public_url`.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info};
use tutoring_core::ports::{BlobStore, PortError, PortResult};

pub struct LocalBlobStore {
    root: PathBuf,
    public_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Only plain relative segments are accepted, so every blob stays
    /// inside `root`.
    fn resolve(&self, path: &str) -> PortResult<PathBuf> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(PortError::Unexpected(format!(
                "refusing to store a blob at '{}'",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create blob directory {:?}: {:?}", parent, e);
                PortError::Unexpected(e.to_string())
            })?;
        }
        tokio::fs::write(&target, bytes).await.map_err(|e| {
            error!("Failed to write blob {:?}: {:?}", target, e);
            PortError::Unexpected(e.to_string())
        })?;
        info!(path, size = bytes.len(), "blob stored");
        Ok(format!("{}/{}", self.public_url, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_land_under_the_root_and_return_a_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path(), "http://localhost:3000/blobs/");

        let url = blobs
            .upload("profile_pictures/u1/abc_me.png", b"png-bytes")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:3000/blobs/profile_pictures/u1/abc_me.png");
        let written = std::fs::read(dir.path().join("profile_pictures/u1/abc_me.png")).unwrap();
        assert_eq!(written, b"png-bytes");
    }

    #[tokio::test]
    async fn paths_escaping_the_root_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path(), "http://x");
        for path in ["../outside.txt", "/etc/passwd", "a/../../b", ""] {
            assert!(blobs.upload(path, b"x").await.is_err(), "{}", path);
        }
    }
}
