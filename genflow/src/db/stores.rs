//! Storage traits the rest of the service is written against.
//!
//! Each trait has a Postgres implementation ([`super::postgres::PgStore`]) and an in-memory one
//! ([`super::in_memory::InMemoryStore`]). Both honour the same contracts: ledger mutations are
//! atomic per user and append exactly one usage event, and job transitions are conditional on
//! the current status.

use crate::{
    db::{
        errors::Result,
        models::{
            credits::{LedgerEntryRequest, UsageEventDBResponse},
            images::{SourceImageCreateDBRequest, SourceImageDBResponse},
            jobs::{JobCreateDBRequest, JobDBResponse},
            profiles::{ProfileDBResponse, SubscriptionUpdate},
        },
        postgres::PgStore,
        in_memory::InMemoryStore,
    },
    types::{ImageId, JobId, UserId},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;

/// Per-user credit balances with an append-only audit trail
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Decrement the balance by `entry.amount` iff the balance covers it.
    ///
    /// Returns `false` without any mutation when it does not. Concurrent calls for the same user
    /// are serialized.
    async fn consume(&self, entry: LedgerEntryRequest) -> Result<bool>;

    /// Increment the balance, returning the new balance
    async fn add(&self, entry: LedgerEntryRequest) -> Result<Decimal>;

    /// Increment the balance unless the user already has an event with `entry.reason`.
    ///
    /// Returns `None` without any mutation when it does.
    async fn add_once(&self, entry: LedgerEntryRequest) -> Result<Option<Decimal>>;

    async fn balance(&self, user_id: UserId) -> Result<Decimal>;

    /// Usage events, newest first
    async fn list_events(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<UsageEventDBResponse>>;
}

/// Durable job records
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, request: JobCreateDBRequest) -> Result<JobDBResponse>;

    async fn get(&self, id: JobId) -> Result<Option<JobDBResponse>>;

    async fn list_for_user(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<JobDBResponse>, i64)>;

    /// pending -> processing; errors with `InvalidState` when the job is not pending
    async fn claim(&self, id: JobId) -> Result<JobDBResponse>;

    /// processing -> completed
    async fn complete(&self, id: JobId, result_paths: Vec<String>) -> Result<JobDBResponse>;

    /// processing -> failed
    async fn fail(&self, id: JobId, error_message: String) -> Result<JobDBResponse>;

    async fn rename(&self, id: JobId, user_id: UserId, name: Option<String>) -> Result<JobDBResponse>;

    /// Only failed jobs may be deleted
    async fn delete_failed(&self, id: JobId, user_id: UserId) -> Result<()>;
}

/// Billing profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<ProfileDBResponse>>;

    /// Returns the profile and whether it was created by this call
    async fn get_or_create(&self, user_id: UserId, email: Option<String>) -> Result<(ProfileDBResponse, bool)>;

    async fn mark_signup_granted(&self, user_id: UserId) -> Result<()>;

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<ProfileDBResponse>>;

    async fn find_by_subscription_id(&self, subscription_id: &str) -> Result<Option<ProfileDBResponse>>;

    async fn update_subscription(&self, user_id: UserId, update: SubscriptionUpdate) -> Result<ProfileDBResponse>;
}

/// Registered source images
#[async_trait]
pub trait SourceImageStore: Send + Sync {
    async fn create(&self, request: SourceImageCreateDBRequest) -> Result<SourceImageDBResponse>;

    /// The images that exist among `ids`, in no particular order
    async fn get_bulk(&self, ids: &[ImageId]) -> Result<Vec<SourceImageDBResponse>>;
}

/// All stores the application needs, behind trait objects
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn CreditLedger>,
    pub jobs: Arc<dyn JobStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub images: Arc<dyn SourceImageStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self::from_backend(Arc::new(PgStore::new(pool)))
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryStore::new()))
    }

    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: CreditLedger + JobStore + ProfileStore + SourceImageStore + 'static,
    {
        Self {
            ledger: backend.clone(),
            jobs: backend.clone(),
            profiles: backend.clone(),
            images: backend,
        }
    }
}
