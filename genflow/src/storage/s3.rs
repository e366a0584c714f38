//! S3 object store. Credentials come from the standard AWS provider chain.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    error::{ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
};
use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;
use url::Url;

use super::{ObjectStore, Result, SignedUrl, StorageError, StoredObject, validate_key};

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

fn backend_error<E: ProvideErrorMetadata + std::fmt::Debug>(operation: &str, err: SdkError<E>) -> StorageError {
    let detail = err
        .as_service_error()
        .and_then(|e| e.message().map(str::to_string))
        .unwrap_or_else(|| format!("{err:?}"));
    StorageError::Backend(format!("S3 {operation} failed: {detail}"))
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the environment, optionally overriding the region and endpoint
    pub async fn from_env(bucket: String, region: Option<String>, endpoint: Option<Url>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/')).force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| backend_error("put_object", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        validate_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::NotFound { key: key.to_string() },
                _ => backend_error("get_object", e),
            })?;

        let content_type = output
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 read of {key} failed: {e}")))?;

        Ok(StoredObject {
            bytes: body.into_bytes(),
            content_type,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("delete_object", e))?;
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl> {
        validate_key(key)?;
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_not_found() => StorageError::NotFound { key: key.to_string() },
                _ => backend_error("head_object", e),
            })?;

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Backend(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| backend_error("presign", e))?;

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(SignedUrl {
            url: request.uri().to_string(),
            expires_at: Utc::now() + ttl,
        })
    }
}
