//! Stripe webhooks.
//!
//! Events are verified and decoded by [`stripe::Webhook::construct_event`], then mapped onto
//! [`BillingEventKind`]:
//!
//! | Stripe event                                         | Billing event                 |
//! |------------------------------------------------------|-------------------------------|
//! | `checkout.session.completed` (subscription mode)     | `SubscriptionStarted`         |
//! | `invoice.payment_succeeded` (`subscription_cycle`)   | `RecurringPaymentSucceeded`   |
//! | `customer.subscription.updated`                      | `SubscriptionUpdated`         |
//! | `customer.subscription.deleted`                      | `SubscriptionCanceled`        |
//! | `invoice.payment_failed`                             | `PaymentFailed`               |
//!
//! The first invoice of a subscription is granted through the checkout session, so only renewal
//! invoices produce a recurring grant. Renewals are priced from the plan stored on the profile,
//! which `customer.subscription.updated` keeps current.

use async_trait::async_trait;
use axum::http::HeaderMap;
use stripe_checkout::CheckoutSessionMode;
use stripe_shared::InvoiceBillingReason;
use stripe_webhook::{Event, EventObject, EventType};

use super::{BillingEvent, BillingEventKind, PaymentError, PaymentProvider, Result, header};
use crate::config::StripeConfig;

pub struct StripeProvider {
    webhook_secret: String,
}

impl From<StripeConfig> for StripeProvider {
    fn from(config: StripeConfig) -> Self {
        Self::new(config.webhook_secret)
    }
}

impl StripeProvider {
    pub fn new(webhook_secret: String) -> Self {
        Self { webhook_secret }
    }

    fn map_event(event: Event) -> Result<BillingEventKind> {
        let event_type = format!("{:?}", event.type_);
        let ignored = || BillingEventKind::Ignored {
            event_type: event_type.clone(),
        };

        let kind = match (event.type_, event.data.object) {
            (EventType::CheckoutSessionCompleted, EventObject::CheckoutSessionCompleted(session)) => {
                if !matches!(session.mode, CheckoutSessionMode::Subscription) {
                    return Ok(ignored());
                }
                let user_id = session
                    .client_reference_id
                    .as_deref()
                    .map(|id| {
                        id.parse()
                            .map_err(|_| PaymentError::InvalidData(format!("client_reference_id '{id}' is not a user id")))
                    })
                    .transpose()?;
                BillingEventKind::SubscriptionStarted {
                    user_id,
                    customer_id: session.customer.as_ref().map(|customer| customer.id().to_string()),
                    subscription_id: session.subscription.as_ref().map(|subscription| subscription.id().to_string()),
                    price_id: session.metadata.as_ref().and_then(|metadata| metadata.get("price_id")).cloned(),
                }
            }
            (EventType::InvoicePaymentSucceeded, EventObject::InvoicePaymentSucceeded(invoice)) => {
                if !matches!(invoice.billing_reason, Some(InvoiceBillingReason::SubscriptionCycle)) {
                    return Ok(ignored());
                }
                BillingEventKind::RecurringPaymentSucceeded {
                    customer_id: invoice.customer.as_ref().map(|customer| customer.id().to_string()),
                    subscription_id: None,
                    price_id: None,
                }
            }
            (EventType::InvoicePaymentFailed, EventObject::InvoicePaymentFailed(invoice)) => BillingEventKind::PaymentFailed {
                customer_id: invoice.customer.as_ref().map(|customer| customer.id().to_string()),
                subscription_id: None,
            },
            (EventType::CustomerSubscriptionUpdated, EventObject::CustomerSubscriptionUpdated(subscription)) => {
                BillingEventKind::SubscriptionUpdated {
                    customer_id: Some(subscription.customer.id().to_string()),
                    subscription_id: Some(subscription.id.to_string()),
                    status: subscription.status.as_str().to_string(),
                    price_id: subscription.items.data.first().map(|item| item.price.id.to_string()),
                }
            }
            (EventType::CustomerSubscriptionDeleted, EventObject::CustomerSubscriptionDeleted(subscription)) => {
                BillingEventKind::SubscriptionCanceled {
                    customer_id: Some(subscription.customer.id().to_string()),
                    subscription_id: Some(subscription.id.to_string()),
                }
            }
            _ => ignored(),
        };
        Ok(kind)
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<BillingEvent> {
        let signature = header(headers, "stripe-signature")?;

        let event = stripe_webhook::Webhook::construct_event(body, signature, &self.webhook_secret).map_err(|e| {
            tracing::warn!("Failed to construct Stripe webhook event: {:?}", e);
            PaymentError::InvalidSignature(format!("webhook validation failed: {e}"))
        })?;

        let id = event.id.to_string();
        let kind = Self::map_event(event)?;
        tracing::debug!(event_id = %id, kind = ?kind, "Validated Stripe webhook");

        Ok(BillingEvent { id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_test_stripe";

    fn provider() -> StripeProvider {
        StripeProvider::new(SECRET.to_string())
    }

    /// `Stripe-Signature` header for `body`, as Stripe computes it
    fn signed_headers(body: &str, timestamp: i64, secret: &str) -> HeaderMap {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{body}").as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t={timestamp},v1={signature}")).unwrap(),
        );
        headers
    }

    const BODY: &str = r#"{"id":"evt_123","object":"event","type":"charge.refunded","data":{"object":{}}}"#;

    #[tokio::test]
    async fn test_rejects_missing_header() {
        let err = provider().validate_webhook(&HeaderMap::new(), BODY).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_rejects_tampered_body() {
        let headers = signed_headers(BODY, Utc::now().timestamp(), SECRET);
        let err = provider()
            .validate_webhook(&headers, &BODY.replace("evt_123", "evt_999"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret() {
        let headers = signed_headers(BODY, Utc::now().timestamp(), "whsec_someone_else");
        let err = provider().validate_webhook(&headers, BODY).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_rejects_stale_timestamp() {
        let headers = signed_headers(BODY, Utc::now().timestamp() - 3600, SECRET);
        let err = provider().validate_webhook(&headers, BODY).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_header() {
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", HeaderValue::from_static("v1=deadbeef"));
        let err = provider().validate_webhook(&headers, BODY).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }
}
