use crate::{
    db::models::images::SourceImageDBResponse,
    types::{FolderId, ImageId},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// An uploaded source image, referenced by id when creating jobs
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SourceImageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ImageId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub folder_id: Option<FolderId>,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SourceImageDBResponse> for SourceImageResponse {
    fn from(image: SourceImageDBResponse) -> Self {
        Self {
            id: image.id,
            folder_id: image.folder_id,
            storage_path: image.storage_path,
            mime_type: image.mime_type,
            size_bytes: image.size_bytes,
            original_name: image.original_name,
            created_at: image.created_at,
        }
    }
}
