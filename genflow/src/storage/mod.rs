//! Blob storage for uploaded source images and generated results.
//!
//! Two backends implement [`ObjectStore`]:
//!
//! - [`local::LocalObjectStore`]: files under a root directory, served back through
//!   `GET /storage/{*key}` with HMAC-signed, expiring query parameters
//! - [`s3::S3ObjectStore`]: an S3 bucket, handing out presigned GET URLs
//!
//! Keys are `/`-separated relative paths such as `uploads/{user}/{folder}/{name}` or
//! `results/{user}/{job}-result.png`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use url::Url;

use crate::config::StorageConfig;

pub mod local;
pub mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object {key} not found")]
    NotFound { key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signed URL expired")]
    Expired,

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A stored object with its content type
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// A temporary read link
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object at `key`
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<StoredObject>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// A URL granting read access to `key` for `ttl`. Fails with [`StorageError::NotFound`]
    /// when the object does not exist.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl>;

    /// The filesystem backend, when this is one. Only that backend serves its own signed URLs.
    fn as_local(&self) -> Option<&LocalObjectStore> {
        None
    }
}

/// Build the configured object store
pub async fn create_object_store(config: &StorageConfig, public_url: &Url) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Local { path, signing_secret } => {
            let secret = signing_secret
                .clone()
                .ok_or_else(|| anyhow::anyhow!("local storage requires a signing_secret"))?;
            let store = LocalObjectStore::new(path.clone(), secret, public_url.clone());
            tokio::fs::create_dir_all(path).await?;
            tracing::info!(path = %path.display(), "Using local object storage");
            Ok(Arc::new(store))
        }
        StorageConfig::S3 { bucket, region, endpoint } => {
            let store = S3ObjectStore::from_env(bucket.clone(), region.clone(), endpoint.clone()).await;
            tracing::info!(bucket = %bucket, "Using S3 object storage");
            Ok(Arc::new(store))
        }
    }
}

/// Reject keys that could escape the storage root or that no backend can represent
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key.split('/').all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid { Ok(()) } else { Err(StorageError::InvalidKey(key.to_string())) }
}

/// File extension for a content type, falling back to `bin`
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => mime_guess::get_mime_extensions_str(essence)
            .and_then(|extensions| extensions.first().copied())
            .unwrap_or("bin"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("uploads/u/f/a.png").is_ok());
        assert!(validate_key("results/u/j-result.png").is_ok());

        for bad in ["", "/abs/path", "a/../b", "a//b", "./a", "a\\b", "trailing/"] {
            assert!(matches!(validate_key(bad), Err(StorageError::InvalidKey(_))), "{bad}");
        }
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg; charset=binary"), "jpg");
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("application/x-nothing-known"), "bin");
    }
}
