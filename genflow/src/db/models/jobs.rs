//! Database models for generation jobs.

use crate::types::{FolderId, ImageId, JobId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Job lifecycle state. Only ever advances pending -> processing -> completed | failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database request for creating a job. Jobs are always created pending.
#[derive(Debug, Clone)]
pub struct JobCreateDBRequest {
    /// Chosen by the caller so the credit reservation can name the job before it exists
    pub id: JobId,
    pub user_id: UserId,
    /// Ordered: index 0 is the scene image, the rest are references
    pub image_ids: Vec<ImageId>,
    pub prompt: String,
    /// Canonical model identifier (see [`crate::generation::ModelSelector`])
    pub model: String,
    pub style: Option<String>,
    pub folder_id: Option<FolderId>,
    pub name: Option<String>,
    pub num_outputs: i32,
    pub aspect_ratio: Option<String>,
    pub credits_used: Decimal,
}

/// Database response for a job
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct JobDBResponse {
    pub id: JobId,
    pub user_id: UserId,
    pub image_ids: Vec<ImageId>,
    pub prompt: String,
    pub model: String,
    pub style: Option<String>,
    pub folder_id: Option<FolderId>,
    pub name: Option<String>,
    pub num_outputs: i32,
    pub aspect_ratio: Option<String>,
    pub status: JobStatus,
    pub credits_used: Decimal,
    /// First stored result; set iff completed
    pub result_path: Option<String>,
    /// Every stored result, in provider order
    pub result_paths: Vec<String>,
    /// Set iff failed
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
