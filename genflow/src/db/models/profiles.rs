//! Database models for billing profiles.

use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Subscription status written when a renewal payment fails
pub const STATUS_PAST_DUE: &str = "past_due";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_CANCELED: &str = "canceled";

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProfileDBResponse {
    pub user_id: UserId,
    pub email: Option<String>,
    pub billing_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub plan_price_id: Option<String>,
    pub signup_granted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a profile's billing fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub billing_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub plan_price_id: Option<String>,
}
