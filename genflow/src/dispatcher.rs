//! Job creation: validate, reserve credits, persist, hand off.
//!
//! The reservation happens before the job row exists, so a refused reservation leaves nothing
//! behind. The job id is chosen first and recorded on the reservation. If the row then cannot be written the reservation is compensated, keeping "no job,
//! no charge". Once the job is persisted its id is handed to the worker; a failed hand-off
//! leaves the job pending with its credits consumed.

use serde_json::json;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::jobs::JobCreate,
    db::models::{
        credits::{LedgerEntryRequest, UsageReason},
        jobs::{JobCreateDBRequest, JobDBResponse},
    },
    errors::{Error, Result},
    generation::ModelSelector,
    metrics,
    types::{ImageId, UserId, abbrev_uuid},
};

/// Request-level validation, before anything is read or written
fn validate(state: &AppState, request: &JobCreate) -> Result<(ModelSelector, u32)> {
    let limits = &state.config.generation;
    let bad_request = |message: String| Error::BadRequest { message };

    if request.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty".to_string()));
    }
    if request.image_ids.is_empty() {
        return Err(bad_request("at least one image id is required".to_string()));
    }
    if request.image_ids.len() > limits.max_images {
        return Err(bad_request(format!("at most {} images may be used per job", limits.max_images)));
    }

    let num_outputs = request.num_outputs.unwrap_or(1);
    if num_outputs < 1 || num_outputs > i64::from(limits.max_outputs) {
        return Err(bad_request(format!("num_outputs must be between 1 and {}", limits.max_outputs)));
    }

    let selector = match request.model.as_deref() {
        Some(model) => ModelSelector::parse(model, limits).map_err(bad_request)?,
        None => ModelSelector::default_for_ratio(request.aspect_ratio.as_deref()),
    };

    Ok((selector, num_outputs as u32))
}

/// Every referenced image must exist and belong to the caller. Both failures are a 404.
async fn check_ownership(state: &AppState, user_id: UserId, image_ids: &[ImageId]) -> Result<()> {
    let unique: Vec<ImageId> = image_ids.iter().copied().collect::<HashSet<_>>().into_iter().collect();
    let found = state.stores.images.get_bulk(&unique).await?;

    for id in &unique {
        let owned = found.iter().any(|image| image.id == *id && image.user_id == user_id);
        if !owned {
            return Err(Error::NotFound {
                resource: "Image".to_string(),
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

/// Create a job for `user_id` and trigger its worker
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&user_id)))]
pub async fn create_job(state: &AppState, user_id: UserId, request: JobCreate) -> Result<JobDBResponse> {
    let (selector, num_outputs) = validate(state, &request)?;
    check_ownership(state, user_id, &request.image_ids).await?;

    let model = selector.identifier(&state.config.generation);
    let required = selector.credits_required(num_outputs);

    let job_id = Uuid::new_v4();
    let reserved = state
        .stores
        .ledger
        .consume(
            LedgerEntryRequest::new(user_id, required, UsageReason::JobConsume)
                .with_metadata(json!({ "job_id": job_id, "model": model, "num_outputs": num_outputs })),
        )
        .await?;
    if !reserved {
        let available = state.stores.ledger.balance(user_id).await?;
        return Err(Error::InsufficientCredits { available, required });
    }
    metrics::record_credits_consumed(required);

    let job = match state
        .stores
        .jobs
        .create(JobCreateDBRequest {
            id: job_id,
            user_id,
            image_ids: request.image_ids,
            prompt: request.prompt,
            model: model.clone(),
            style: request.style,
            folder_id: request.folder_id,
            name: request.job_name,
            num_outputs: num_outputs as i32,
            aspect_ratio: request.aspect_ratio,
            credits_used: required,
        })
        .await
    {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Failed to persist job, returning reserved credits");
            state
                .stores
                .ledger
                .add(
                    LedgerEntryRequest::new(user_id, required, UsageReason::JobCreationRollback)
                        .with_metadata(json!({ "job_id": job_id, "model": model })),
                )
                .await?;
            return Err(e.into());
        }
    };
    metrics::record_job_created(&model);
    info!(job_id = %job.id, %model, credits = %required, "Created job");

    if let Err(e) = state.trigger.trigger(job.id).await {
        warn!(job_id = %job.id, error = %e, "Worker trigger failed, job stays pending");
        return Err(Error::Internal {
            operation: format!("trigger worker for job {}", job.id),
        });
    }

    Ok(job)
}
