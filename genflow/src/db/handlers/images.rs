use crate::{
    db::{
        errors::Result,
        models::images::{SourceImageCreateDBRequest, SourceImageDBResponse},
    },
    types::ImageId,
};
use sqlx::PgConnection;

const IMAGE_COLUMNS: &str = "id, user_id, folder_id, storage_path, mime_type, size_bytes, original_name, created_at";

pub struct SourceImages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> SourceImages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &SourceImageCreateDBRequest) -> Result<SourceImageDBResponse> {
        let image = sqlx::query_as::<_, SourceImageDBResponse>(&format!(
            r#"
            INSERT INTO source_images (id, user_id, folder_id, storage_path, mime_type, size_bytes, original_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {IMAGE_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(request.user_id)
        .bind(request.folder_id)
        .bind(&request.storage_path)
        .bind(&request.mime_type)
        .bind(request.size_bytes)
        .bind(&request.original_name)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(image)
    }

    /// Fetch the images that exist among `ids`, in no particular order
    pub async fn get_bulk(&mut self, ids: &[ImageId]) -> Result<Vec<SourceImageDBResponse>> {
        let images = sqlx::query_as::<_, SourceImageDBResponse>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM source_images WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(images)
    }
}
