//! Applies verified billing events to the credit ledger and billing profiles.

use rust_decimal::Decimal;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};

use super::{BillingEvent, BillingEventKind, PaymentError, Result};
use crate::{
    db::{
        models::{
            credits::{LedgerEntryRequest, UsageReason},
            profiles::{ProfileDBResponse, STATUS_ACTIVE, STATUS_CANCELED, STATUS_PAST_DUE, SubscriptionUpdate},
        },
        stores::{CreditLedger, ProfileStore},
    },
    metrics,
};

pub struct BillingEventConsumer {
    ledger: Arc<dyn CreditLedger>,
    profiles: Arc<dyn ProfileStore>,
    /// Credits granted per billing period, keyed by price id
    plans: HashMap<String, Decimal>,
}

impl BillingEventConsumer {
    pub fn new(ledger: Arc<dyn CreditLedger>, profiles: Arc<dyn ProfileStore>, plans: HashMap<String, Decimal>) -> Self {
        Self { ledger, profiles, plans }
    }

    fn grant_for(&self, price_id: Option<&str>) -> Result<(String, Decimal)> {
        let price_id = price_id.ok_or_else(|| PaymentError::InvalidData("event carries no price id".to_string()))?;
        let amount = self
            .plans
            .get(price_id)
            .copied()
            .ok_or_else(|| PaymentError::UnknownPlan(price_id.to_string()))?;
        Ok((price_id.to_string(), amount))
    }

    /// The profile an event refers to, by subscription first and customer second
    async fn find_profile(&self, subscription_id: Option<&str>, customer_id: Option<&str>) -> Result<Option<ProfileDBResponse>> {
        if let Some(subscription_id) = subscription_id
            && let Some(profile) = self.profiles.find_by_subscription_id(subscription_id).await?
        {
            return Ok(Some(profile));
        }
        if let Some(customer_id) = customer_id {
            return Ok(self.profiles.find_by_customer_id(customer_id).await?);
        }
        Ok(None)
    }

    async fn set_status(
        &self,
        event: &BillingEvent,
        subscription_id: Option<&str>,
        customer_id: Option<&str>,
        status: &str,
        price_id: Option<&str>,
    ) -> Result<()> {
        let Some(profile) = self.find_profile(subscription_id, customer_id).await? else {
            warn!(event_id = %event.id, ?subscription_id, ?customer_id, "No profile for subscription status change, ignoring");
            return Ok(());
        };

        self.profiles
            .update_subscription(
                profile.user_id,
                SubscriptionUpdate {
                    subscription_status: Some(status.to_string()),
                    plan_price_id: price_id.map(str::to_string),
                    ..Default::default()
                },
            )
            .await?;
        info!(user_id = %profile.user_id, status, "Updated subscription status");
        Ok(())
    }

    /// Apply one verified event.
    ///
    /// Errors surface to the provider as a server error so that it redelivers the event.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn handle(&self, event: &BillingEvent) -> Result<()> {
        match &event.kind {
            BillingEventKind::SubscriptionStarted {
                user_id,
                customer_id,
                subscription_id,
                price_id,
            } => {
                let user_id = match user_id {
                    Some(user_id) => *user_id,
                    None => {
                        self.find_profile(None, customer_id.as_deref())
                            .await?
                            .ok_or_else(|| PaymentError::InvalidData("subscription start without a user reference".to_string()))?
                            .user_id
                    }
                };
                let (price_id, amount) = self.grant_for(price_id.as_deref())?;

                self.profiles
                    .update_subscription(
                        user_id,
                        SubscriptionUpdate {
                            billing_customer_id: customer_id.clone(),
                            subscription_id: subscription_id.clone(),
                            subscription_status: Some(STATUS_ACTIVE.to_string()),
                            plan_price_id: Some(price_id.clone()),
                        },
                    )
                    .await?;

                let balance = self
                    .ledger
                    .add(
                        LedgerEntryRequest::new(user_id, amount, UsageReason::SubscriptionGrant).with_metadata(json!({
                            "event_id": event.id,
                            "price_id": price_id,
                            "subscription_id": subscription_id,
                        })),
                    )
                    .await?;
                metrics::record_credits_granted("subscription_grant", amount);
                info!(user_id = %user_id, %amount, %balance, "Granted subscription credits");
            }
            BillingEventKind::RecurringPaymentSucceeded {
                customer_id,
                subscription_id,
                price_id,
            } => {
                let profile = self
                    .find_profile(subscription_id.as_deref(), customer_id.as_deref())
                    .await?
                    .ok_or_else(|| {
                        PaymentError::ProfileNotFound(format!(
                            "subscription {subscription_id:?} / customer {customer_id:?}"
                        ))
                    })?;
                let (price_id, amount) = self.grant_for(price_id.as_deref().or(profile.plan_price_id.as_deref()))?;

                let balance = self
                    .ledger
                    .add(
                        LedgerEntryRequest::new(profile.user_id, amount, UsageReason::RecurringGrant).with_metadata(json!({
                            "event_id": event.id,
                            "price_id": price_id,
                            "subscription_id": subscription_id,
                        })),
                    )
                    .await?;
                metrics::record_credits_granted("recurring_grant", amount);
                info!(user_id = %profile.user_id, %amount, %balance, "Granted recurring credits");
            }
            BillingEventKind::SubscriptionUpdated {
                customer_id,
                subscription_id,
                status,
                price_id,
            } => {
                self.set_status(event, subscription_id.as_deref(), customer_id.as_deref(), status, price_id.as_deref())
                    .await?;
            }
            BillingEventKind::SubscriptionCanceled {
                customer_id,
                subscription_id,
            } => {
                self.set_status(event, subscription_id.as_deref(), customer_id.as_deref(), STATUS_CANCELED, None)
                    .await?;
            }
            BillingEventKind::PaymentFailed {
                customer_id,
                subscription_id,
            } => {
                self.set_status(event, subscription_id.as_deref(), customer_id.as_deref(), STATUS_PAST_DUE, None)
                    .await?;
            }
            BillingEventKind::Ignored { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring billing event");
            }
        }
        Ok(())
    }
}
