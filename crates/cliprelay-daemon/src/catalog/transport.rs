//! Where clip bytes come from.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::CatalogError;

/// Owned clip byte stream handed to a destination.
pub type ClipReader = Box<dyn AsyncRead + Send + Unpin>;

/// Listing and fetch backend for the catalog.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// All keys under `prefix`, in a stable order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CatalogError>;

    /// Open a clip. The length is 0 when the backend cannot report it.
    async fn fetch_content(&self, key: &str) -> Result<(ClipReader, u64), CatalogError>;
}

/// Serves clips from a local directory tree.
///
/// Keys are `/`-separated paths relative to the root.
#[derive(Debug, Clone)]
pub struct DiskTransport {
    root: PathBuf,
}

impl DiskTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, CatalogError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && !key.split('/').any(str::is_empty)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(CatalogError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl CatalogTransport for DiskTransport {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
        let listing_err = |source| CatalogError::Listing {
            prefix: prefix.to_string(),
            source,
        };

        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(listing_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(listing_err)? {
                let Ok(name) = entry.file_name().into_string() else {
                    debug!(path = %entry.path().display(), "Skipping non UTF-8 path");
                    continue;
                };
                let key = format!("{key_prefix}{name}");
                let file_type = entry.file_type().await.map_err(listing_err)?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn fetch_content(&self, key: &str) -> Result<(ClipReader, u64), CatalogError> {
        let fetch_err = |source| CatalogError::Fetch {
            key: key.to_string(),
            source,
        };
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(fetch_err)?;
        let length = file.metadata().await.map_err(fetch_err)?.len();
        Ok((Box::new(file), length))
    }
}
