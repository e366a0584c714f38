//! Test utilities (available with the `test-utils` feature).
//!
//! Everything runs in process: in-memory stores, a local object store rooted at a caller-owned
//! directory, and a [`MockProvider`] in place of the generation service.

use bytes::Bytes;
use std::{path::Path, sync::Arc};
use url::Url;

use crate::{
    AppState, build_router, build_state,
    api::handlers::images::upload_key,
    config::{Config, DatabaseConfig, StorageConfig, WorkerConfig},
    db::{models::images::SourceImageCreateDBRequest, stores::Stores},
    generation::mock::{MockOutcome, MockProvider},
    storage::{LocalObjectStore, ObjectStore},
    types::{FolderId, ImageId, UserId},
};

pub const TEST_USER_HEADER: &str = "x-genflow-user";
pub const TEST_SERVICE_TOKEN: &str = "test-service-token";
/// Standard Webhooks secret for the dummy billing provider
pub const TEST_WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
const TEST_SIGNING_SECRET: &str = "test-signing-secret";

/// Configuration for an in-process application whose objects live under `root`
pub fn test_config(root: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: Url::parse("http://localhost:3001").unwrap(),
        database: DatabaseConfig::Memory,
        storage: StorageConfig::Local {
            path: root.to_path_buf(),
            signing_secret: Some(TEST_SIGNING_SECRET.to_string()),
        },
        worker: WorkerConfig {
            service_token: Some(TEST_SERVICE_TOKEN.to_string()),
            trigger_url: None,
        },
        enable_metrics: false,
        ..Default::default()
    }
}

/// An application state over in-memory stores, plus handles tests poke at directly
pub struct TestHarness {
    pub state: AppState,
    pub provider: Arc<MockProvider>,
}

impl TestHarness {
    /// The provider answers with no outputs unless scripted
    pub fn new(config: Config) -> Self {
        Self::with_provider(config, MockProvider::new(MockOutcome::Empty(None)))
    }

    pub fn with_provider(config: Config, provider: MockProvider) -> Self {
        let StorageConfig::Local { path, signing_secret } = &config.storage else {
            panic!("test harness requires local storage");
        };
        let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            path.clone(),
            signing_secret.clone().unwrap_or_default(),
            config.public_url.clone(),
        ));
        let provider = Arc::new(provider);
        let state = build_state(config, Stores::in_memory(), objects, provider.clone()).unwrap();
        Self { state, provider }
    }

    pub fn router(&self) -> anyhow::Result<axum::Router> {
        build_router(&self.state)
    }

    /// Store a small PNG for `user` and record it as a source image
    pub async fn upload_image(&self, user: UserId, folder: Option<FolderId>) -> ImageId {
        let image_id = uuid::Uuid::new_v4();
        let key = upload_key(user, folder, image_id, "png");
        let bytes = Bytes::from_static(b"\x89PNG\r\n\x1a\ntest");
        let size = bytes.len() as i64;
        self.state.objects.put(&key, bytes, "image/png").await.unwrap();

        self.state
            .stores
            .images
            .create(SourceImageCreateDBRequest {
                id: image_id,
                user_id: user,
                folder_id: folder,
                storage_path: key,
                mime_type: "image/png".to_string(),
                size_bytes: size,
                original_name: Some("scene.png".to_string()),
            })
            .await
            .unwrap()
            .id
    }
}

pub fn test_state(config: Config) -> TestHarness {
    TestHarness::new(config)
}
