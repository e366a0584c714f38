//! Copies generated assets from the provider into object storage.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    db::models::jobs::JobDBResponse,
    generation::GeneratedAsset,
    storage::{ObjectStore, StorageError, extension_for},
};

/// Storage key for a job with a single result
pub fn single_result_key(job: &JobDBResponse, extension: &str) -> String {
    format!("results/{}/{}-result.{extension}", job.user_id, job.id)
}

/// Storage key for one of several results. Results are grouped by the job's folder when it has
/// one, otherwise by the job itself.
pub fn multi_result_key(job: &JobDBResponse, extension: &str) -> String {
    let group = job.folder_id.unwrap_or(job.id);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "results/{}/{group}/{}-{}.{extension}",
        job.user_id,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

pub struct ResultMaterializer {
    http: reqwest::Client,
    objects: Arc<dyn ObjectStore>,
}

impl ResultMaterializer {
    pub fn new(http: reqwest::Client, objects: Arc<dyn ObjectStore>) -> Self {
        Self { http, objects }
    }

    /// Download every asset and store it, returning the keys in provider order
    #[instrument(skip_all, fields(job_id = %job.id, assets = assets.len()))]
    pub async fn materialize(&self, job: &JobDBResponse, assets: &[GeneratedAsset]) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::with_capacity(assets.len());
        for asset in assets {
            let (bytes, content_type) = self.download(asset).await?;
            let extension = extension_for(&content_type);
            let key = if assets.len() == 1 {
                single_result_key(job, extension)
            } else {
                multi_result_key(job, extension)
            };

            self.objects.put(&key, bytes, &content_type).await?;
            debug!(key = %key, content_type = %content_type, "Stored generated asset");
            keys.push(key);
        }
        Ok(keys)
    }

    async fn download(&self, asset: &GeneratedAsset) -> Result<(Bytes, String), StorageError> {
        let download_error = |message: String| StorageError::Download {
            url: asset.url.clone(),
            message,
        };

        let response = self
            .http
            .get(&asset.url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("status {status}")));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Provider-reported type wins, then the response header, then the URL's extension
        let content_type = asset
            .content_type
            .clone()
            .or(header_type)
            .filter(|t| !t.is_empty() && t != "application/octet-stream")
            .unwrap_or_else(|| {
                let path = asset.url.split(['?', '#']).next().unwrap_or_default();
                mime_guess::from_path(path).first_or_octet_stream().to_string()
            });

        let bytes = response.bytes().await.map_err(|e| download_error(e.to_string()))?;
        Ok((bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::jobs::JobStatus, storage::LocalObjectStore};
    use rust_decimal::Decimal;
    use url::Url;
    use uuid::Uuid;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn job(folder_id: Option<Uuid>) -> JobDBResponse {
        JobDBResponse {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            image_ids: vec![Uuid::new_v4()],
            prompt: "p".to_string(),
            model: "nano-banana".to_string(),
            style: None,
            folder_id,
            name: None,
            num_outputs: 1,
            aspect_ratio: None,
            status: JobStatus::Processing,
            credits_used: Decimal::ONE,
            result_path: None,
            result_paths: vec![],
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn materializer(dir: &tempfile::TempDir) -> (ResultMaterializer, Arc<dyn ObjectStore>) {
        let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            dir.path().to_path_buf(),
            "secret".to_string(),
            Url::parse("http://localhost:3000").unwrap(),
        ));
        (ResultMaterializer::new(reqwest::Client::new(), objects.clone()), objects)
    }

    #[tokio::test]
    async fn test_single_result_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"png-bytes".to_vec(), "image/png"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (materializer, objects) = materializer(&dir);
        let job = job(None);
        let assets = vec![GeneratedAsset {
            url: format!("{}/out.png", server.uri()),
            content_type: None,
        }];

        let keys = materializer.materialize(&job, &assets).await.unwrap();
        assert_eq!(keys, vec![format!("results/{}/{}-result.png", job.user_id, job.id)]);
        assert_eq!(objects.get(&keys[0]).await.unwrap().bytes, Bytes::from_static(b"png-bytes"));
    }

    #[tokio::test]
    async fn test_multi_result_keys_group_by_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"jpg".to_vec(), "image/jpeg"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (materializer, _) = materializer(&dir);
        let folder = Uuid::new_v4();
        let job = job(Some(folder));
        let assets = vec![
            GeneratedAsset {
                url: format!("{}/a", server.uri()),
                content_type: None,
            },
            GeneratedAsset {
                url: format!("{}/b", server.uri()),
                content_type: Some("image/webp".to_string()),
            },
        ];

        let keys = materializer.materialize(&job, &assets).await.unwrap();
        assert_eq!(keys.len(), 2);
        let prefix = format!("results/{}/{folder}/", job.user_id);
        assert!(keys.iter().all(|k| k.starts_with(&prefix)), "{keys:?}");
        assert!(keys[0].ends_with(".jpg"));
        assert!(keys[1].ends_with(".webp"));
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn test_download_failure_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (materializer, _) = materializer(&dir);
        let assets = vec![GeneratedAsset {
            url: format!("{}/gone.png", server.uri()),
            content_type: None,
        }];

        let err = materializer.materialize(&job(None), &assets).await.unwrap_err();
        assert!(matches!(err, StorageError::Download { .. }));
    }
}
