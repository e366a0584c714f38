//! Store traits backed by the Postgres repositories in [`super::handlers`].

use crate::{
    db::{
        errors::Result,
        handlers::{Credits, Jobs, Profiles, SourceImages},
        models::{
            credits::{LedgerEntryRequest, UsageEventDBResponse},
            images::{SourceImageCreateDBRequest, SourceImageDBResponse},
            jobs::{JobCreateDBRequest, JobDBResponse},
            profiles::{ProfileDBResponse, SubscriptionUpdate},
        },
        stores::{CreditLedger, JobStore, ProfileStore, SourceImageStore},
    },
    types::{ImageId, JobId, UserId},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgStore {
    async fn consume(&self, entry: LedgerEntryRequest) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let balance_after = Credits::new(&mut conn).consume(&entry).await?;
        Ok(balance_after.is_some())
    }

    async fn add(&self, entry: LedgerEntryRequest) -> Result<Decimal> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).add(&entry).await
    }

    async fn add_once(&self, entry: LedgerEntryRequest) -> Result<Option<Decimal>> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).add_once(&entry).await
    }

    async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).get_balance(user_id).await
    }

    async fn list_events(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<UsageEventDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).list_events(user_id, skip, limit).await
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create(&self, request: JobCreateDBRequest) -> Result<JobDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).create(&request).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).get_by_id(id).await
    }

    async fn list_for_user(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<JobDBResponse>, i64)> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).list_for_user(user_id, skip, limit).await
    }

    async fn claim(&self, id: JobId) -> Result<JobDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).claim(id).await
    }

    async fn complete(&self, id: JobId, result_paths: Vec<String>) -> Result<JobDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).complete(id, &result_paths).await
    }

    async fn fail(&self, id: JobId, error_message: String) -> Result<JobDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).fail(id, &error_message).await
    }

    async fn rename(&self, id: JobId, user_id: UserId, name: Option<String>) -> Result<JobDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).rename(id, user_id, name.as_deref()).await
    }

    async fn delete_failed(&self, id: JobId, user_id: UserId) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Jobs::new(&mut conn).delete_failed(id, user_id).await
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get(&self, user_id: UserId) -> Result<Option<ProfileDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).get_by_user_id(user_id).await
    }

    async fn get_or_create(&self, user_id: UserId, email: Option<String>) -> Result<(ProfileDBResponse, bool)> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).get_or_create(user_id, email.as_deref()).await
    }

    async fn mark_signup_granted(&self, user_id: UserId) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).mark_signup_granted(user_id).await
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<ProfileDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).find_by_customer_id(customer_id).await
    }

    async fn find_by_subscription_id(&self, subscription_id: &str) -> Result<Option<ProfileDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).find_by_subscription_id(subscription_id).await
    }

    async fn update_subscription(&self, user_id: UserId, update: SubscriptionUpdate) -> Result<ProfileDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Profiles::new(&mut conn).update_subscription(user_id, &update).await
    }
}

#[async_trait]
impl SourceImageStore for PgStore {
    async fn create(&self, request: SourceImageCreateDBRequest) -> Result<SourceImageDBResponse> {
        let mut conn = self.pool.acquire().await?;
        SourceImages::new(&mut conn).create(&request).await
    }

    async fn get_bulk(&self, ids: &[ImageId]) -> Result<Vec<SourceImageDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        SourceImages::new(&mut conn).get_bulk(ids).await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{
        models::{
            credits::{LedgerEntryRequest, UsageReason},
            jobs::{JobCreateDBRequest, JobStatus},
        },
        stores::Stores,
    };
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;

    #[sqlx::test]
    async fn test_concurrent_store_consumes_stay_within_balance(pool: PgPool) {
        let stores = Arc::new(Stores::postgres(pool));
        let user = Uuid::new_v4();
        stores
            .ledger
            .add(LedgerEntryRequest::new(user, Decimal::from(3), UsageReason::SubscriptionGrant))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let stores = stores.clone();
            handles.push(tokio::spawn(async move {
                stores
                    .ledger
                    .consume(LedgerEntryRequest::new(user, Decimal::ONE, UsageReason::JobConsume))
                    .await
                    .unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 3);
        assert_eq!(stores.ledger.balance(user).await.unwrap(), Decimal::ZERO);
        assert_eq!(stores.ledger.list_events(user, 0, 100).await.unwrap().len(), 4);
    }

    #[sqlx::test]
    async fn test_job_lifecycle_through_stores(pool: PgPool) {
        let stores = Stores::postgres(pool);
        let user = Uuid::new_v4();
        let id = Uuid::new_v4();
        let job = stores
            .jobs
            .create(JobCreateDBRequest {
                id,
                user_id: user,
                image_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                prompt: "a lantern in fog".to_string(),
                model: "gpt-image-1-high-square".to_string(),
                style: Some("watercolour".to_string()),
                folder_id: None,
                name: None,
                num_outputs: 2,
                aspect_ratio: Some("1:1".to_string()),
                credits_used: Decimal::from(4),
            })
            .await
            .unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.image_ids.len(), 2);

        stores.jobs.claim(id).await.unwrap();
        stores.jobs.complete(id, vec!["results/x.png".to_string()]).await.unwrap();

        let (jobs, total) = stores.jobs.list_for_user(user, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].result_path.as_deref(), Some("results/x.png"));
    }
}
