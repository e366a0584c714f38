//! Database models for uploaded source images.

use crate::types::{FolderId, ImageId, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct SourceImageCreateDBRequest {
    pub id: ImageId,
    pub user_id: UserId,
    pub folder_id: Option<FolderId>,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub original_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SourceImageDBResponse {
    pub id: ImageId,
    pub user_id: UserId,
    pub folder_id: Option<FolderId>,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}
