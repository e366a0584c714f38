use crate::{
    db::models::credits::{UsageEventDBResponse, UsageReason},
    types::{UserId, serialize_credits},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Current credit balance
    #[schema(value_type = f64)]
    #[serde(serialize_with = "serialize_credits")]
    pub balance: Decimal,
}

/// One ledger mutation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsageEventResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    /// Signed change: negative for consumption, positive for grants
    #[schema(value_type = f64)]
    #[serde(serialize_with = "serialize_credits")]
    pub delta: Decimal,
    #[schema(value_type = f64)]
    #[serde(serialize_with = "serialize_credits")]
    pub balance_after: Decimal,
    pub reason: UsageReason,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<UsageEventDBResponse> for UsageEventResponse {
    fn from(event: UsageEventDBResponse) -> Self {
        Self {
            id: event.id,
            delta: event.delta,
            balance_after: event.balance_after,
            reason: event.reason,
            metadata: event.metadata,
            created_at: event.created_at,
        }
    }
}
