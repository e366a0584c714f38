//! Source image uploads.

use crate::{
    AppState,
    api::models::images::SourceImageResponse,
    auth::current_user::CurrentUser,
    db::models::images::SourceImageCreateDBRequest,
    errors::{Error, Result},
    storage::extension_for,
    types::FolderId,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

/// Largest accepted source image
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Object key for an upload. Unfiled uploads live under `root`.
pub fn upload_key(user_id: Uuid, folder_id: Option<FolderId>, image_id: Uuid, extension: &str) -> String {
    let folder = folder_id.map(|id| id.to_string()).unwrap_or_else(|| "root".to_string());
    format!("uploads/{user_id}/{folder}/{image_id}.{extension}")
}

struct UploadedFile {
    bytes: Bytes,
    content_type: String,
    file_name: Option<String>,
}

/// Upload a source image
#[utoipa::path(
    post,
    path = "/images",
    tag = "images",
    summary = "Upload a source image",
    description = "Multipart form with a `file` part (an image) and an optional `folder_id`. \
                   The returned id is what job creation references.",
    request_body(content_type = "multipart/form-data", description = "`file` and optional `folder_id`"),
    responses(
        (status = 201, description = "Image stored", body = SourceImageResponse),
        (status = 400, description = "Missing or non-image file"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload too large"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn upload_image(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SourceImageResponse>)> {
    let mut file: Option<UploadedFile> = None;
    let mut folder_id: Option<FolderId> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        match field.name().unwrap_or_default() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .filter(|ct| ct != "application/octet-stream")
                    .or_else(|| {
                        file_name
                            .as_deref()
                            .and_then(|name| mime_guess::from_path(name).first())
                            .map(|mime| mime.essence_str().to_string())
                    })
                    .unwrap_or_default();
                let bytes = field.bytes().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read file: {e}"),
                })?;
                file = Some(UploadedFile {
                    bytes,
                    content_type,
                    file_name,
                });
            }
            "folder_id" => {
                let text = field.text().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read folder_id: {e}"),
                })?;
                if !text.trim().is_empty() {
                    folder_id = Some(text.trim().parse().map_err(|_| Error::BadRequest {
                        message: "folder_id must be a UUID".to_string(),
                    })?);
                }
            }
            // Unknown fields are ignored
            _ => {}
        }
    }

    let file = file.ok_or_else(|| Error::BadRequest {
        message: "Missing required field: 'file'".to_string(),
    })?;
    if !file.content_type.starts_with("image/") {
        return Err(Error::BadRequest {
            message: format!("Unsupported file type '{}', expected an image", file.content_type),
        });
    }
    if file.bytes.is_empty() {
        return Err(Error::BadRequest {
            message: "File is empty".to_string(),
        });
    }

    let image_id = Uuid::new_v4();
    let key = upload_key(current_user.id, folder_id, image_id, extension_for(&file.content_type));
    let size_bytes = file.bytes.len() as i64;
    state.objects.put(&key, file.bytes, &file.content_type).await?;

    let image = state
        .stores
        .images
        .create(SourceImageCreateDBRequest {
            id: image_id,
            user_id: current_user.id,
            folder_id,
            storage_path: key,
            mime_type: file.content_type,
            size_bytes,
            original_name: file.file_name,
        })
        .await?;
    info!(image_id = %image.id, size_bytes, "Stored source image");

    Ok((StatusCode::CREATED, Json(image.into())))
}
