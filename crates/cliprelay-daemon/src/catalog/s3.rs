//! Clips served from an S3-compatible bucket through OpenDAL.
//!
//! Keys are object keys relative to the bucket root. Listing walks the
//! directory part of the prefix recursively and keeps objects whose key starts
//! with the full prefix, the same matching the disk source uses.

use std::io;

use async_trait::async_trait;
use cliprelay_core::config::S3Config;
use opendal::{Operator, services::S3};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use super::transport::{CatalogTransport, ClipReader};
use crate::error::CatalogError;

pub struct S3Transport {
    operator: Operator,
    bucket: String,
}

impl S3Transport {
    pub fn new(config: &S3Config) -> opendal::Result<Self> {
        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint,
            region = %config.region,
            "Init S3 catalog source"
        );

        let mut builder = S3::default()
            .endpoint(&config.endpoint)
            .bucket(&config.bucket)
            .region(&config.region);
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.access_key_id(id).secret_access_key(secret);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self::from_operator(operator, &config.bucket))
    }

    fn from_operator(operator: Operator, bucket: &str) -> Self {
        Self {
            operator,
            bucket: bucket.to_string(),
        }
    }
}

fn io_error(e: opendal::Error) -> io::Error {
    let kind = if matches!(e.kind(), opendal::ErrorKind::NotFound) {
        io::ErrorKind::NotFound
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, e)
}

/// Directory part of `prefix`, including the trailing slash.
fn list_root(prefix: &str) -> &str {
    prefix.rfind('/').map_or("", |i| &prefix[..=i])
}

#[async_trait]
impl CatalogTransport for S3Transport {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
        let root = list_root(prefix);
        debug!(bucket = %self.bucket, root, prefix, "Listing objects");
        let entries = self
            .operator
            .list_with(root)
            .recursive(true)
            .await
            .map_err(|e| CatalogError::Listing {
                prefix: prefix.to_string(),
                source: io_error(e),
            })?;

        let mut keys: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().is_file())
            .map(|entry| entry.path().to_string())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn fetch_content(&self, key: &str) -> Result<(ClipReader, u64), CatalogError> {
        if key.is_empty() || key.ends_with('/') {
            return Err(CatalogError::InvalidKey(key.to_string()));
        }
        let fetch_err = |e| CatalogError::Fetch {
            key: key.to_string(),
            source: io_error(e),
        };

        let length = self
            .operator
            .stat(key)
            .await
            .map_err(fetch_err)?
            .content_length();
        let chunks = self
            .operator
            .reader(key)
            .await
            .map_err(fetch_err)?
            .into_bytes_stream(..)
            .await
            .map_err(fetch_err)?;
        debug!(bucket = %self.bucket, key, length, "Object opened");
        Ok((Box::new(StreamReader::new(Box::pin(chunks))), length))
    }
}
