use crate::{
    db::models::jobs::{JobDBResponse, JobStatus},
    types::{FolderId, ImageId, JobId, serialize_credits},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to generate from one or more source images
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobCreate {
    /// Ordered source images: the first is the scene image, the rest are references
    #[schema(value_type = Vec<String>)]
    pub image_ids: Vec<ImageId>,
    pub prompt: String,
    /// Model identifier, e.g. `gpt-image-1-high-landscape` or `nano-banana`. Defaults to the
    /// medium tier with the aspect of `aspect_ratio`.
    pub model: Option<String>,
    /// `W:H`, e.g. `16:9`
    pub aspect_ratio: Option<String>,
    /// Display name
    pub job_name: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub folder_id: Option<FolderId>,
    /// Appended to the prompt
    pub style: Option<String>,
    /// Number of outputs to generate (default: 1)
    pub num_outputs: Option<i64>,
}

/// Returned as soon as the job is persisted and handed to a worker
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobCreated {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[schema(value_type = f64)]
    #[serde(serialize_with = "serialize_credits")]
    pub credits_used: Decimal,
    pub result_path: Option<String>,
}

impl From<&JobDBResponse> for JobCreated {
    fn from(job: &JobDBResponse) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            credits_used: job.credits_used,
            result_path: job.result_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: JobId,
    pub name: Option<String>,
    pub status: JobStatus,
    pub model: String,
    pub prompt: String,
    pub style: Option<String>,
    #[schema(value_type = Vec<String>)]
    pub image_ids: Vec<ImageId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub folder_id: Option<FolderId>,
    pub num_outputs: i32,
    pub aspect_ratio: Option<String>,
    #[schema(value_type = f64)]
    #[serde(serialize_with = "serialize_credits")]
    pub credits_used: Decimal,
    /// Storage key of the first result, set once completed
    pub result_path: Option<String>,
    pub result_paths: Vec<String>,
    /// Set once failed
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobDBResponse> for JobResponse {
    fn from(job: JobDBResponse) -> Self {
        Self {
            id: job.id,
            name: job.name,
            status: job.status,
            model: job.model,
            prompt: job.prompt,
            style: job.style,
            image_ids: job.image_ids,
            folder_id: job.folder_id,
            num_outputs: job.num_outputs,
            aspect_ratio: job.aspect_ratio,
            credits_used: job.credits_used,
            result_path: job.result_path,
            result_paths: job.result_paths,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Rename a job; `null` clears the name
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobUpdate {
    pub name: Option<String>,
}

/// Temporary read link for a job result
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}
