//! Database models for the credit ledger.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a ledger mutation happened, stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UsageReason {
    /// Credits reserved for a generation job
    JobConsume,
    /// First grant when a subscription starts
    SubscriptionGrant,
    /// Grant on each paid renewal
    RecurringGrant,
    /// Grant when a profile is created
    SignupGrant,
    /// Compensation for a reservation whose job row could not be persisted
    JobCreationRollback,
}

/// A ledger mutation. `amount` is always positive; the direction comes from the operation.
#[derive(Debug, Clone)]
pub struct LedgerEntryRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub reason: UsageReason,
    pub metadata: serde_json::Value,
}

impl LedgerEntryRequest {
    pub fn new(user_id: UserId, amount: Decimal, reason: UsageReason) -> Self {
        Self {
            user_id,
            amount,
            reason,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only audit record of one ledger mutation
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UsageEventDBResponse {
    pub id: Uuid,
    pub user_id: UserId,
    /// Signed change applied to the balance
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub reason: UsageReason,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
