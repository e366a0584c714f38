//! Generation models, pricing and the external provider boundary.
//!
//! A job's `model` string is parsed once into a [`ModelSelector`], which decides both what the job
//! costs and which provider endpoint serves it. Tiered identifiers look like
//! `{tiered_model}-{quality}-{aspect}` (e.g. `gpt-image-1-high-portrait`) and are priced per
//! output by quality; every other configured model costs one credit per output.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};

use crate::config::{GenerationConfig, GenerationProviderConfig};

pub mod fal;
pub mod mock;
pub mod request;

pub use fal::FalProvider;
pub use mock::MockProvider;
pub use request::{GenerationRequest, RequestBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    /// Credits charged per output at this quality
    pub fn rate(self) -> Decimal {
        match self {
            Quality::Low => Decimal::new(5, 1),
            Quality::Medium => Decimal::ONE,
            Quality::High => Decimal::from(7),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(format!("unknown quality '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Square,
    Landscape,
    Portrait,
}

impl Aspect {
    pub fn as_str(self) -> &'static str {
        match self {
            Aspect::Square => "square",
            Aspect::Landscape => "landscape",
            Aspect::Portrait => "portrait",
        }
    }

    /// Output size requested from the provider
    pub fn image_size(self) -> &'static str {
        match self {
            Aspect::Square => "1024x1024",
            Aspect::Landscape => "1536x1024",
            Aspect::Portrait => "1024x1536",
        }
    }

    /// Classify a free-form `W:H` ratio. Anything unparsable is treated as square.
    pub fn from_ratio(ratio: &str) -> Self {
        let parsed = ratio
            .split_once(':')
            .and_then(|(w, h)| Some((w.trim().parse::<f64>().ok()?, h.trim().parse::<f64>().ok()?)));

        match parsed {
            Some((w, h)) if w > h => Aspect::Landscape,
            Some((w, h)) if w < h => Aspect::Portrait,
            _ => Aspect::Square,
        }
    }
}

impl FromStr for Aspect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "square" => Ok(Aspect::Square),
            "landscape" => Ok(Aspect::Landscape),
            "portrait" => Ok(Aspect::Portrait),
            other => Err(format!("unknown aspect '{other}'")),
        }
    }
}

/// A validated model choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    /// The provider-tier family, priced by quality
    Tiered { quality: Quality, aspect: Aspect },
    /// A configured model at a flat price
    Flat { name: String },
}

impl ModelSelector {
    /// Parse a model identifier against the configured model table
    pub fn parse(identifier: &str, config: &GenerationConfig) -> Result<Self, String> {
        if config.models.contains_key(identifier) {
            return Ok(ModelSelector::Flat {
                name: identifier.to_string(),
            });
        }

        if let Some(rest) = identifier
            .strip_prefix(config.tiered_model.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        {
            let (quality, aspect) = rest
                .split_once('-')
                .ok_or_else(|| format!("model '{identifier}' must be {}-<quality>-<aspect>", config.tiered_model))?;
            return Ok(ModelSelector::Tiered {
                quality: quality.parse()?,
                aspect: aspect.parse()?,
            });
        }

        Err(format!("unknown model '{identifier}'"))
    }

    /// The selector used when a request names no model: the medium tier at the requested ratio
    pub fn default_for_ratio(aspect_ratio: Option<&str>) -> Self {
        ModelSelector::Tiered {
            quality: Quality::Medium,
            aspect: aspect_ratio.map(Aspect::from_ratio).unwrap_or(Aspect::Square),
        }
    }

    /// Canonical identifier stored on the job
    pub fn identifier(&self, config: &GenerationConfig) -> String {
        match self {
            ModelSelector::Tiered { quality, aspect } => {
                format!("{}-{}-{}", config.tiered_model, quality.as_str(), aspect.as_str())
            }
            ModelSelector::Flat { name } => name.clone(),
        }
    }

    pub fn credits_required(&self, num_outputs: u32) -> Decimal {
        let per_output = match self {
            ModelSelector::Tiered { quality, .. } => quality.rate(),
            ModelSelector::Flat { .. } => Decimal::ONE,
        };
        per_output * Decimal::from(num_outputs)
    }

    /// Provider endpoint serving this selector
    pub fn endpoint<'a>(&self, config: &'a GenerationConfig) -> Option<&'a str> {
        match self {
            ModelSelector::Tiered { .. } => Some(config.tiered_endpoint.as_str()),
            ModelSelector::Flat { name } => config.models.get(name).map(String::as_str),
        }
    }
}

/// One generated asset, as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider finished without producing anything
    #[error("{}", .0.as_deref().unwrap_or("no images generated"))]
    NoOutputs(Option<String>),

    /// The provider reported a failure
    #[error("{0}")]
    Failed(String),

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// An external AI generation service
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit the request and wait for its result. Image URLs are passed in request order.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedAsset>, ProviderError>;
}

/// Create the configured generation provider
pub fn create_provider(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    match &config.provider {
        GenerationProviderConfig::Fal(fal) => Ok(Arc::new(FalProvider::new(fal.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig::default()
    }

    #[test]
    fn test_parse_tiered() {
        let selector = ModelSelector::parse("gpt-image-1-high-portrait", &config()).unwrap();
        assert_eq!(
            selector,
            ModelSelector::Tiered {
                quality: Quality::High,
                aspect: Aspect::Portrait
            }
        );
        assert_eq!(selector.identifier(&config()), "gpt-image-1-high-portrait");
        assert_eq!(selector.endpoint(&config()), Some("fal-ai/gpt-image-1/edit-image"));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(ModelSelector::parse("gpt-image-1-ultra-square", &config()).is_err());
        assert!(ModelSelector::parse("gpt-image-1-low-round", &config()).is_err());
        assert!(ModelSelector::parse("gpt-image-1", &config()).is_err());
        assert!(ModelSelector::parse("dall-e-9", &config()).is_err());
    }

    #[test]
    fn test_parse_flat() {
        let selector = ModelSelector::parse("nano-banana", &config()).unwrap();
        assert_eq!(
            selector,
            ModelSelector::Flat {
                name: "nano-banana".to_string()
            }
        );
        assert_eq!(selector.endpoint(&config()), Some("fal-ai/nano-banana/edit"));
    }

    #[test]
    fn test_pricing() {
        let cfg = config();
        let price = |id: &str, n: u32| ModelSelector::parse(id, &cfg).unwrap().credits_required(n);

        assert_eq!(price("gpt-image-1-low-square", 1), Decimal::new(5, 1));
        assert_eq!(price("gpt-image-1-low-landscape", 3), Decimal::new(15, 1));
        assert_eq!(price("gpt-image-1-medium-portrait", 2), Decimal::from(2));
        assert_eq!(price("gpt-image-1-high-square", 1), Decimal::from(7));
        assert_eq!(price("gpt-image-1-high-landscape", 4), Decimal::from(28));
        assert_eq!(price("flux-kontext", 1), Decimal::ONE);
        assert_eq!(price("kling-video", 3), Decimal::from(3));
    }

    #[test]
    fn test_aspect_from_ratio() {
        assert_eq!(Aspect::from_ratio("16:9"), Aspect::Landscape);
        assert_eq!(Aspect::from_ratio("2:3"), Aspect::Portrait);
        assert_eq!(Aspect::from_ratio("1:1"), Aspect::Square);
        assert_eq!(Aspect::from_ratio("wide"), Aspect::Square);
        assert_eq!(
            ModelSelector::default_for_ratio(Some("9:16")),
            ModelSelector::Tiered {
                quality: Quality::Medium,
                aspect: Aspect::Portrait
            }
        );
    }

    #[test]
    fn test_no_outputs_message() {
        assert_eq!(ProviderError::NoOutputs(None).to_string(), "no images generated");
        assert_eq!(
            ProviderError::NoOutputs(Some("content policy violation".into())).to_string(),
            "content policy violation"
        );
    }
}
