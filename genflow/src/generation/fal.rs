//! fal.ai queue API client.
//!
//! A request is submitted to `{base_url}/{endpoint}`, which answers with a `status_url` and a
//! `response_url`. The status URL is polled until it reports `COMPLETED`, then the response
//! document is fetched. There is no client-side deadline; the call waits as long as the provider
//! keeps the request alive.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{GeneratedAsset, GenerationProvider, GenerationRequest, ProviderError};
use crate::config::FalConfig;

#[derive(Debug, Deserialize)]
struct QueueSubmission {
    request_id: String,
    status_url: String,
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct FalProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    poll_interval: Duration,
}

/// Makes sure a url has a trailing slash so that `join` appends rather than replaces.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Pull the generated assets out of a response document. Image endpoints answer with an `images`
/// array, video endpoints with a single `video` object.
fn extract_assets(document: &Value) -> Result<Vec<GeneratedAsset>, ProviderError> {
    let mut assets: Vec<GeneratedAsset> = match document.get("images") {
        Some(images) => serde_json::from_value(images.clone()).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?,
        None => Vec::new(),
    };

    if let Some(video) = document.get("video").filter(|v| !v.is_null()) {
        assets.push(serde_json::from_value(video.clone()).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?);
    }

    if assets.is_empty() {
        let message = ["detail", "error", "message"]
            .iter()
            .find_map(|field| document.get(*field).and_then(Value::as_str))
            .map(str::to_string);
        return Err(ProviderError::NoOutputs(message));
    }

    Ok(assets)
}

impl FalProvider {
    pub fn new(config: FalConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| anyhow::anyhow!("fal provider requires an api_key"))?;
        Ok(Self {
            client: Client::builder().build()?,
            base_url: config.base_url,
            api_key,
            poll_interval: config.poll_interval,
        })
    }

    fn authorization(&self) -> String {
        format!("Key {}", self.api_key)
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<QueueSubmission, ProviderError> {
        let url = ensure_slash(&self.base_url)
            .join(request.endpoint.trim_start_matches('/'))
            .map_err(|e| ProviderError::InvalidResponse(format!("bad endpoint '{}': {e}", request.endpoint)))?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&request.payload())
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn wait_for_completion(&self, status_url: &str) -> Result<(), ProviderError> {
        loop {
            let response = self
                .client
                .get(status_url)
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .send()
                .await?;
            let status: QueueStatus = Self::check(response).await?.json().await?;

            match status.status.as_str() {
                "COMPLETED" => {
                    if let Some(error) = status.error {
                        return Err(ProviderError::Failed(error));
                    }
                    return Ok(());
                }
                "IN_QUEUE" | "IN_PROGRESS" => {
                    debug!(status = %status.status, "Waiting for provider");
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => {
                    return Err(ProviderError::Failed(
                        status.error.unwrap_or_else(|| format!("provider reported status {other}")),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for FalProvider {
    #[instrument(skip_all, fields(endpoint = %request.endpoint, images = request.image_urls.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedAsset>, ProviderError> {
        let submission = self.submit(request).await?;
        debug!(request_id = %submission.request_id, "Submitted generation request");

        self.wait_for_completion(&submission.status_url).await?;

        let response = self
            .client
            .get(&submission.response_url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;
        let document: Value = Self::check(response).await?.json().await?;

        let assets = extract_assets(&document)?;
        debug!(request_id = %submission.request_id, outputs = assets.len(), "Generation finished");
        Ok(assets)
    }
}
