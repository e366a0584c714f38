//! In-process provider for development and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{GeneratedAsset, GenerationProvider, GenerationRequest, ProviderError};

/// What the mock answers with
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Assets(Vec<GeneratedAsset>),
    /// Finish with no outputs, optionally with a provider message
    Empty(Option<String>),
    Fail(String),
}

/// Records every request and answers from a script, falling back to a default outcome
pub struct MockProvider {
    default: MockOutcome,
    scripted: Mutex<VecDeque<MockOutcome>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockProvider {
    pub fn new(default: MockOutcome) -> Self {
        Self {
            default,
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that always returns the given asset URLs
    pub fn returning(urls: &[&str]) -> Self {
        Self::new(MockOutcome::Assets(
            urls.iter()
                .map(|url| GeneratedAsset {
                    url: url.to_string(),
                    content_type: None,
                })
                .collect(),
        ))
    }

    /// Answer the next call with `outcome` instead of the default
    pub fn push(&self, outcome: MockOutcome) {
        self.scripted.lock().push_back(outcome);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedAsset>, ProviderError> {
        self.requests.lock().push(request.clone());
        let outcome = self.scripted.lock().pop_front().unwrap_or_else(|| self.default.clone());

        match outcome {
            MockOutcome::Assets(assets) if !assets.is_empty() => Ok(assets),
            MockOutcome::Assets(_) => Err(ProviderError::NoOutputs(None)),
            MockOutcome::Empty(message) => Err(ProviderError::NoOutputs(message)),
            MockOutcome::Fail(message) => Err(ProviderError::Failed(message)),
        }
    }
}
