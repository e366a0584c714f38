//! Assembles the provider payload for a job.

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{collections::HashMap, sync::Arc};

use super::ModelSelector;
use crate::{
    config::GenerationConfig,
    db::{errors::DbError, models::jobs::JobDBResponse, stores::SourceImageStore},
    storage::{ObjectStore, StorageError},
    types::ImageId,
};

/// Everything the provider needs for one job. `image_urls` keeps the job's image order: index 0 is
/// the scene, the rest are references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub endpoint: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub parameters: Map<String, Value>,
}

impl GenerationRequest {
    /// The JSON body submitted to the provider
    pub fn payload(&self) -> Value {
        let mut body = self.parameters.clone();
        body.insert("prompt".to_string(), json!(self.prompt));
        body.insert("image_urls".to_string(), json!(self.image_urls));
        Value::Object(body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("source image {0} not found")]
    MissingImage(ImageId),

    #[error("could not resolve source image: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Model(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

pub struct RequestBuilder {
    images: Arc<dyn SourceImageStore>,
    objects: Arc<dyn ObjectStore>,
    config: GenerationConfig,
}

impl RequestBuilder {
    pub fn new(images: Arc<dyn SourceImageStore>, objects: Arc<dyn ObjectStore>, config: GenerationConfig) -> Self {
        Self { images, objects, config }
    }

    /// Resolve every source image to a temporary URL and derive the output parameters. Any image
    /// that cannot be resolved fails the whole build.
    #[tracing::instrument(skip_all, fields(job_id = %job.id))]
    pub async fn build(&self, job: &JobDBResponse) -> Result<GenerationRequest, BuildError> {
        let selector = ModelSelector::parse(&job.model, &self.config).map_err(BuildError::Model)?;
        let endpoint = selector
            .endpoint(&self.config)
            .ok_or_else(|| BuildError::Model(format!("no endpoint configured for model '{}'", job.model)))?
            .to_string();

        let image_urls = self.resolve_image_urls(&job.image_ids).await?;

        let prompt = match job.style.as_deref().map(str::trim) {
            Some(style) if !style.is_empty() => format!("{}. Style: {style}", job.prompt.trim_end()),
            _ => job.prompt.clone(),
        };

        let mut parameters = Map::new();
        parameters.insert("num_images".to_string(), json!(job.num_outputs));
        match selector {
            ModelSelector::Tiered { quality, aspect } => {
                parameters.insert("quality".to_string(), json!(quality.as_str()));
                parameters.insert("image_size".to_string(), json!(aspect.image_size()));
            }
            ModelSelector::Flat { .. } => {
                if let Some(ratio) = &job.aspect_ratio {
                    parameters.insert("aspect_ratio".to_string(), json!(ratio));
                }
            }
        }

        tracing::debug!(endpoint = %endpoint, images = image_urls.len(), "Built generation request");

        Ok(GenerationRequest {
            endpoint,
            prompt,
            image_urls,
            parameters,
        })
    }

    async fn resolve_image_urls(&self, image_ids: &[ImageId]) -> Result<Vec<String>, BuildError> {
        let records: HashMap<_, _> = self
            .images
            .get_bulk(image_ids)
            .await?
            .into_iter()
            .map(|image| (image.id, image.storage_path))
            .collect();

        let paths = image_ids
            .iter()
            .map(|id| records.get(id).ok_or(BuildError::MissingImage(*id)))
            .collect::<Result<Vec<_>, _>>()?;

        // Resolved concurrently; try_join_all keeps input order
        let signed = try_join_all(paths.into_iter().map(|path| self.objects.signed_url(path, self.config.signed_url_ttl))).await?;

        Ok(signed.into_iter().map(|s| s.url).collect())
    }
}
