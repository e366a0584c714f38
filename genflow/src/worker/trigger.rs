//! Handing a job id across the asynchronous boundary.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use super::Worker;
use crate::types::JobId;

/// Starts processing of a persisted job. Only the job id crosses this boundary.
#[async_trait]
pub trait WorkerTrigger: Send + Sync {
    async fn trigger(&self, job_id: JobId) -> anyhow::Result<()>;
}

/// Posts the job id to a worker endpoint, authenticated with the service token
pub struct HttpWorkerTrigger {
    client: reqwest::Client,
    url: Url,
    service_token: String,
}

impl HttpWorkerTrigger {
    pub fn new(client: reqwest::Client, url: Url, service_token: String) -> Self {
        Self {
            client,
            url,
            service_token,
        }
    }
}

#[async_trait]
impl WorkerTrigger for HttpWorkerTrigger {
    #[instrument(skip_all, fields(job_id = %job_id, url = %self.url))]
    async fn trigger(&self, job_id: JobId) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.service_token)
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("worker trigger for job {job_id} returned {status}: {body}");
        }

        debug!("Worker accepted job");
        Ok(())
    }
}

/// Claims and runs the job inside this process
pub struct LocalWorkerTrigger {
    worker: Worker,
}

impl LocalWorkerTrigger {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl WorkerTrigger for LocalWorkerTrigger {
    async fn trigger(&self, job_id: JobId) -> anyhow::Result<()> {
        self.worker.claim_and_spawn(job_id).await?;
        Ok(())
    }
}
