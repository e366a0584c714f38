//! Process-local implementation of the store traits.
//!
//! Used when no database is configured and throughout the test suite. All state sits behind one
//! mutex, so every operation is trivially atomic, including the conditional ledger decrement and
//! the job status transitions.

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::{credits::ensure_positive, jobs::transition_error},
        models::{
            credits::{LedgerEntryRequest, UsageEventDBResponse},
            images::{SourceImageCreateDBRequest, SourceImageDBResponse},
            jobs::{JobCreateDBRequest, JobDBResponse, JobStatus},
            profiles::{ProfileDBResponse, SubscriptionUpdate},
        },
        stores::{CreditLedger, JobStore, ProfileStore, SourceImageStore},
    },
    types::{ImageId, JobId, UserId},
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    balances: HashMap<UserId, Decimal>,
    events: Vec<UsageEventDBResponse>,
    jobs: HashMap<JobId, JobDBResponse>,
    profiles: HashMap<UserId, ProfileDBResponse>,
    images: HashMap<ImageId, SourceImageDBResponse>,
}

impl State {
    fn record_event(&mut self, request: &LedgerEntryRequest, delta: Decimal, balance_after: Decimal) {
        self.events.push(UsageEventDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            delta,
            balance_after,
            reason: request.reason,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        });
    }

    /// Apply `update` to a job currently in `from`, or report why it cannot be applied
    fn transition(
        &mut self,
        id: JobId,
        from: JobStatus,
        operation: &str,
        update: impl FnOnce(&mut JobDBResponse),
    ) -> Result<JobDBResponse> {
        let job = self.jobs.get_mut(&id).ok_or(DbError::NotFound)?;
        if job.status != from {
            return Err(transition_error(id, Some(job.status), operation));
        }
        update(job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditLedger for InMemoryStore {
    async fn consume(&self, entry: LedgerEntryRequest) -> Result<bool> {
        ensure_positive(entry.amount)?;
        let mut state = self.state.lock();

        let Some(balance) = state.balances.get_mut(&entry.user_id) else {
            return Ok(false);
        };
        if *balance < entry.amount {
            return Ok(false);
        }
        *balance -= entry.amount;
        let balance_after = *balance;

        state.record_event(&entry, -entry.amount, balance_after);
        Ok(true)
    }

    async fn add(&self, entry: LedgerEntryRequest) -> Result<Decimal> {
        ensure_positive(entry.amount)?;
        let mut state = self.state.lock();

        let balance = state.balances.entry(entry.user_id).or_insert(Decimal::ZERO);
        *balance += entry.amount;
        let balance_after = *balance;

        state.record_event(&entry, entry.amount, balance_after);
        Ok(balance_after)
    }

    async fn add_once(&self, entry: LedgerEntryRequest) -> Result<Option<Decimal>> {
        ensure_positive(entry.amount)?;
        let mut state = self.state.lock();

        let applied = state
            .events
            .iter()
            .any(|event| event.user_id == entry.user_id && event.reason == entry.reason);
        if applied {
            return Ok(None);
        }

        let balance = state.balances.entry(entry.user_id).or_insert(Decimal::ZERO);
        *balance += entry.amount;
        let balance_after = *balance;

        state.record_event(&entry, entry.amount, balance_after);
        Ok(Some(balance_after))
    }

    async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        Ok(self.state.lock().balances.get(&user_id).copied().unwrap_or(Decimal::ZERO))
    }

    async fn list_events(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<UsageEventDBResponse>> {
        let state = self.state.lock();
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|event| event.user_id == user_id)
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, request: JobCreateDBRequest) -> Result<JobDBResponse> {
        if request.image_ids.is_empty() || request.prompt.trim().is_empty() || request.num_outputs < 1 {
            return Err(DbError::CheckViolation {
                constraint: None,
                table: Some("jobs".to_string()),
                message: "invalid job".to_string(),
            });
        }

        let mut state = self.state.lock();
        if state.jobs.contains_key(&request.id) {
            return Err(DbError::UniqueViolation {
                constraint: Some("jobs_pkey".to_string()),
                table: Some("jobs".to_string()),
                message: format!("job {} already exists", request.id),
            });
        }

        let now = Utc::now();
        let job = JobDBResponse {
            id: request.id,
            user_id: request.user_id,
            image_ids: request.image_ids,
            prompt: request.prompt,
            model: request.model,
            style: request.style,
            folder_id: request.folder_id,
            name: request.name,
            num_outputs: request.num_outputs,
            aspect_ratio: request.aspect_ratio,
            status: JobStatus::Pending,
            credits_used: request.credits_used,
            result_path: None,
            result_paths: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobDBResponse>> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<JobDBResponse>, i64)> {
        let state = self.state.lock();
        let mut jobs: Vec<_> = state.jobs.values().filter(|job| job.user_id == user_id).cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = jobs.len() as i64;
        let page = jobs
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn claim(&self, id: JobId) -> Result<JobDBResponse> {
        self.state
            .lock()
            .transition(id, JobStatus::Pending, "claim", |job| job.status = JobStatus::Processing)
    }

    async fn complete(&self, id: JobId, result_paths: Vec<String>) -> Result<JobDBResponse> {
        let Some(first) = result_paths.first().cloned() else {
            return Err(DbError::Other(anyhow::anyhow!("cannot complete job {id} without a result")));
        };

        self.state.lock().transition(id, JobStatus::Processing, "complete", |job| {
            job.status = JobStatus::Completed;
            job.result_path = Some(first);
            job.result_paths = result_paths;
        })
    }

    async fn fail(&self, id: JobId, error_message: String) -> Result<JobDBResponse> {
        self.state.lock().transition(id, JobStatus::Processing, "fail", |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message);
        })
    }

    async fn rename(&self, id: JobId, user_id: UserId, name: Option<String>) -> Result<JobDBResponse> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .filter(|job| job.user_id == user_id)
            .ok_or(DbError::NotFound)?;
        job.name = name;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete_failed(&self, id: JobId, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock();
        let status = state
            .jobs
            .get(&id)
            .filter(|job| job.user_id == user_id)
            .map(|job| job.status)
            .ok_or(DbError::NotFound)?;

        if status != JobStatus::Failed {
            return Err(transition_error(id, Some(status), "delete"));
        }
        state.jobs.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get(&self, user_id: UserId) -> Result<Option<ProfileDBResponse>> {
        Ok(self.state.lock().profiles.get(&user_id).cloned())
    }

    async fn get_or_create(&self, user_id: UserId, email: Option<String>) -> Result<(ProfileDBResponse, bool)> {
        let mut state = self.state.lock();
        if let Some(existing) = state.profiles.get(&user_id) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let profile = ProfileDBResponse {
            user_id,
            email,
            billing_customer_id: None,
            subscription_id: None,
            subscription_status: None,
            plan_price_id: None,
            signup_granted_at: None,
            created_at: now,
            updated_at: now,
        };
        state.profiles.insert(user_id, profile.clone());
        Ok((profile, true))
    }

    async fn mark_signup_granted(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock();
        let profile = state.profiles.get_mut(&user_id).ok_or(DbError::NotFound)?;
        if profile.signup_granted_at.is_none() {
            let now = Utc::now();
            profile.signup_granted_at = Some(now);
            profile.updated_at = now;
        }
        Ok(())
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<ProfileDBResponse>> {
        let state = self.state.lock();
        Ok(state
            .profiles
            .values()
            .find(|profile| profile.billing_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn find_by_subscription_id(&self, subscription_id: &str) -> Result<Option<ProfileDBResponse>> {
        let state = self.state.lock();
        Ok(state
            .profiles
            .values()
            .filter(|profile| profile.subscription_id.as_deref() == Some(subscription_id))
            .max_by_key(|profile| profile.updated_at)
            .cloned())
    }

    async fn update_subscription(&self, user_id: UserId, update: SubscriptionUpdate) -> Result<ProfileDBResponse> {
        let mut state = self.state.lock();

        if let Some(customer_id) = update.billing_customer_id.as_deref() {
            let taken = state
                .profiles
                .values()
                .any(|profile| profile.user_id != user_id && profile.billing_customer_id.as_deref() == Some(customer_id));
            if taken {
                return Err(DbError::UniqueViolation {
                    constraint: Some("profiles_billing_customer_id_unique".to_string()),
                    table: Some("profiles".to_string()),
                    message: format!("billing customer {customer_id} already linked"),
                });
            }
        }

        let now = Utc::now();
        let profile = state.profiles.entry(user_id).or_insert_with(|| ProfileDBResponse {
            user_id,
            email: None,
            billing_customer_id: None,
            subscription_id: None,
            subscription_status: None,
            plan_price_id: None,
            signup_granted_at: None,
            created_at: now,
            updated_at: now,
        });

        if update.billing_customer_id.is_some() {
            profile.billing_customer_id = update.billing_customer_id;
        }
        if update.subscription_id.is_some() {
            profile.subscription_id = update.subscription_id;
        }
        if update.subscription_status.is_some() {
            profile.subscription_status = update.subscription_status;
        }
        if update.plan_price_id.is_some() {
            profile.plan_price_id = update.plan_price_id;
        }
        profile.updated_at = now;

        Ok(profile.clone())
    }
}

#[async_trait]
impl SourceImageStore for InMemoryStore {
    async fn create(&self, request: SourceImageCreateDBRequest) -> Result<SourceImageDBResponse> {
        let mut state = self.state.lock();
        if state.images.contains_key(&request.id) {
            return Err(DbError::UniqueViolation {
                constraint: Some("source_images_pkey".to_string()),
                table: Some("source_images".to_string()),
                message: format!("image {} already exists", request.id),
            });
        }

        let image = SourceImageDBResponse {
            id: request.id,
            user_id: request.user_id,
            folder_id: request.folder_id,
            storage_path: request.storage_path,
            mime_type: request.mime_type,
            size_bytes: request.size_bytes,
            original_name: request.original_name,
            created_at: Utc::now(),
        };
        state.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn get_bulk(&self, ids: &[ImageId]) -> Result<Vec<SourceImageDBResponse>> {
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.images.get(id).cloned()).collect())
    }
}
