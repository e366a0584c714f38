//! The asynchronous half of a job.
//!
//! A worker receives a job id (over HTTP from the dispatcher, or in-process), claims the job
//! (`pending -> processing`) and runs the pipeline:
//!
//! 1. [`RequestBuilder`] resolves the source images to temporary URLs, in order
//! 2. the [`GenerationProvider`] produces the assets
//! 3. the [`ResultMaterializer`] copies them into object storage
//! 4. the job is completed with the stored keys, or failed with the first error
//!
//! Failures are recorded on the job row; credits are not refunded and nothing is retried.

use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    db::{errors::DbError, models::jobs::JobDBResponse, stores::JobStore},
    events::{JobEvent, JobEventHub},
    generation::{GenerationProvider, ProviderError, RequestBuilder, request::BuildError},
    metrics,
    storage::StorageError,
    types::JobId,
};

pub mod materializer;
pub mod trigger;

pub use materializer::ResultMaterializer;
pub use trigger::{HttpWorkerTrigger, LocalWorkerTrigger, WorkerTrigger};

/// Why a job failed. The message is stored on the job as-is.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct Worker {
    jobs: Arc<dyn JobStore>,
    builder: Arc<RequestBuilder>,
    provider: Arc<dyn GenerationProvider>,
    materializer: Arc<ResultMaterializer>,
    events: JobEventHub,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        builder: RequestBuilder,
        provider: Arc<dyn GenerationProvider>,
        materializer: ResultMaterializer,
        events: JobEventHub,
    ) -> Self {
        Self {
            jobs,
            builder: Arc::new(builder),
            provider,
            materializer: Arc::new(materializer),
            events,
        }
    }

    /// Claim a pending job and run it in the background.
    ///
    /// Errors with [`DbError::NotFound`] for unknown jobs and [`DbError::InvalidState`] when the
    /// job is no longer pending, so a second trigger for the same job never runs it twice.
    pub async fn claim_and_spawn(&self, job_id: JobId) -> Result<JobDBResponse, DbError> {
        let job = self.jobs.claim(job_id).await?;
        self.events.publish(JobEvent::from(&job));

        let worker = self.clone();
        let claimed = job.clone();
        tokio::spawn(
            async move {
                if let Err(e) = worker.run(claimed).await {
                    error!(error = %e, "Failed to record job outcome");
                }
            }
            .instrument(info_span!("job", job_id = %job_id)),
        );

        Ok(job)
    }

    /// Run the pipeline for a claimed job and record the outcome
    pub async fn run(&self, job: JobDBResponse) -> Result<JobDBResponse, DbError> {
        let finished = match self.execute(&job).await {
            Ok(result_paths) => match self.jobs.complete(job.id, result_paths).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "Failed to complete job, marking it failed");
                    self.jobs.fail(job.id, "failed to record result".to_string()).await?
                }
            },
            Err(e) => {
                warn!(error = %e, "Job failed");
                self.jobs.fail(job.id, e.to_string()).await?
            }
        };

        info!(status = %finished.status, result_path = ?finished.result_path, "Job finished");
        metrics::record_job_finished(finished.status);
        self.events.publish(JobEvent::from(&finished));
        Ok(finished)
    }

    async fn execute(&self, job: &JobDBResponse) -> Result<Vec<String>, PipelineError> {
        let request = self.builder.build(job).await?;
        let assets = self.provider.generate(&request).await?;
        if assets.is_empty() {
            return Err(ProviderError::NoOutputs(None).into());
        }
        Ok(self.materializer.materialize(job, &assets).await?)
    }
}
