//! Filesystem object store with HMAC-signed read links.
//!
//! A signed link is `{public_url}/storage/{key}?expires={unix_secs}&signature={hex}`, where the
//! signature is HMAC-SHA256 over `{key}:{expires}` with the configured signing secret.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{path::PathBuf, time::Duration};
use url::Url;

use super::{ObjectStore, Result, SignedUrl, StorageError, StoredObject, validate_key};

type HmacSha256 = Hmac<Sha256>;

pub struct LocalObjectStore {
    root: PathBuf,
    signing_secret: String,
    public_url: Url,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, signing_secret: String, public_url: Url) -> Self {
        Self {
            root,
            signing_secret,
            public_url,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(self.signing_secret.as_bytes()).map_err(|e| StorageError::Backend(e.to_string()))?;
        mac.update(format!("{key}:{expires}").as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, key: &str, expires: i64) -> Result<String> {
        Ok(hex::encode(self.mac(key, expires)?.finalize().into_bytes()))
    }

    /// Check a signed link's parameters. The signature is checked before expiry.
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> Result<()> {
        let provided = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;
        self.mac(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature)?;

        if Utc::now().timestamp() > expires {
            return Err(StorageError::Expired);
        }
        Ok(())
    }

    fn link(&self, key: &str, expires_at: DateTime<Utc>) -> Result<Url> {
        let expires = expires_at.timestamp();
        let mut url = self
            .public_url
            .join(&format!("storage/{key}"))
            .map_err(|e| StorageError::Backend(format!("cannot build link for {key}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(key, expires)?);
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never observe a partial object
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound { key: key.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(StoredObject {
            bytes: Bytes::from(bytes),
            content_type: mime_guess::from_path(&path).first_or_octet_stream().to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound { key: key.to_string() });
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::Backend(e.to_string()))?;
        let expires_at = Utc::now() + ttl;
        let url = self.link(key, expires_at)?;

        Ok(SignedUrl {
            url: url.to_string(),
            expires_at,
        })
    }

    fn as_local(&self) -> Option<&LocalObjectStore> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> LocalObjectStore {
        LocalObjectStore::new(
            dir.path().to_path_buf(),
            "test-signing-secret".to_string(),
            Url::parse("http://localhost:3000").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_put_get_overwrite_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.put("results/u/j-result.png", Bytes::from_static(b"one"), "image/png").await.unwrap();
        store.put("results/u/j-result.png", Bytes::from_static(b"two"), "image/png").await.unwrap();

        let object = store.get("results/u/j-result.png").await.unwrap();
        assert_eq!(object.bytes, Bytes::from_static(b"two"));
        assert_eq!(object.content_type, "image/png");

        store.delete("results/u/j-result.png").await.unwrap();
        assert!(matches!(
            store.get("results/u/j-result.png").await,
            Err(StorageError::NotFound { .. })
        ));
        // Deleting twice is fine
        store.delete("results/u/j-result.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.put("../outside.png", Bytes::new(), "image/png").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_url_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.put("uploads/u/f/a.png", Bytes::from_static(b"png"), "image/png").await.unwrap();

        let signed = store.signed_url("uploads/u/f/a.png", Duration::from_secs(300)).await.unwrap();
        let url = Url::parse(&signed.url).unwrap();
        assert_eq!(url.path(), "/storage/uploads/u/f/a.png");

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = params["expires"].parse().unwrap();
        assert_eq!(expires, signed.expires_at.timestamp());
        store.verify("uploads/u/f/a.png", expires, &params["signature"]).unwrap();

        assert!(matches!(
            store.verify("uploads/u/f/b.png", expires, &params["signature"]),
            Err(StorageError::InvalidSignature)
        ));
        assert!(matches!(
            store.verify("uploads/u/f/a.png", expires + 1, &params["signature"]),
            Err(StorageError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_expired_signature() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let expires = Utc::now().timestamp() - 10;
        let signature = store.sign("uploads/u/f/a.png", expires).unwrap();
        assert!(matches!(
            store.verify("uploads/u/f/a.png", expires, &signature),
            Err(StorageError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_signed_url_for_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.signed_url("uploads/u/f/missing.png", Duration::from_secs(300)).await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
