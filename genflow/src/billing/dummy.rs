//! Provider-neutral webhooks signed per Standard Webhooks.
//!
//! The body is a normalized event, e.g.
//!
//! ```json
//! {"type": "subscription_started", "data": {"user_id": "...", "price_id": "price_pro"}}
//! ```
//!
//! and the `webhook-id` header becomes the event id. Useful for development and tests, and for
//! billing systems that can be taught to emit these events directly.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::{BillingEvent, BillingEventKind, PaymentError, PaymentProvider, Result, header, signing};
use crate::config::DummyConfig;

/// Maximum accepted age of a signed event, in seconds
const TOLERANCE_SECS: u64 = 300;

pub struct DummyProvider {
    webhook_secret: String,
}

impl TryFrom<DummyConfig> for DummyProvider {
    type Error = anyhow::Error;

    fn try_from(config: DummyConfig) -> anyhow::Result<Self> {
        if signing::decode_secret(&config.webhook_secret).is_none() {
            anyhow::bail!("dummy billing webhook_secret must be a whsec_ prefixed base64 secret");
        }
        Ok(Self {
            webhook_secret: config.webhook_secret,
        })
    }
}

#[derive(Deserialize)]
struct TypedEvent {
    #[serde(rename = "type")]
    event_type: String,
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<BillingEvent> {
        let msg_id = header(headers, "webhook-id")?;
        let timestamp: i64 = header(headers, "webhook-timestamp")?
            .parse()
            .map_err(|_| PaymentError::InvalidSignature("invalid webhook-timestamp header".to_string()))?;
        let signature = header(headers, "webhook-signature")?;

        if !signing::verify_signature(msg_id, timestamp, body, signature, &self.webhook_secret) {
            return Err(PaymentError::InvalidSignature("signature mismatch".to_string()));
        }
        if (Utc::now().timestamp() - timestamp).unsigned_abs() > TOLERANCE_SECS {
            return Err(PaymentError::InvalidSignature("timestamp outside tolerance".to_string()));
        }

        let value: Value = serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(e.to_string()))?;
        let TypedEvent { event_type } =
            serde_json::from_value(value.clone()).map_err(|e| PaymentError::InvalidData(e.to_string()))?;

        let kind = match serde_json::from_value::<BillingEventKind>(value) {
            Ok(kind) => kind,
            // A well-formed event of a type we don't know is acknowledged and ignored
            Err(_) if !KNOWN_TYPES.contains(&event_type.as_str()) => BillingEventKind::Ignored { event_type },
            Err(e) => return Err(PaymentError::InvalidData(e.to_string())),
        };

        Ok(BillingEvent {
            id: msg_id.to_string(),
            kind,
        })
    }
}

const KNOWN_TYPES: &[&str] = &[
    "subscription_started",
    "recurring_payment_succeeded",
    "subscription_updated",
    "subscription_canceled",
    "payment_failed",
];

/// Headers for a body signed with `secret`, as a sender would produce them
pub fn signed_headers(msg_id: &str, body: &str, secret: &str) -> Option<HeaderMap> {
    let timestamp = Utc::now().timestamp();
    let signature = signing::sign_payload(msg_id, timestamp, body, secret)?;

    let mut headers = HeaderMap::new();
    headers.insert("webhook-id", msg_id.parse().ok()?);
    headers.insert("webhook-timestamp", timestamp.to_string().parse().ok()?);
    headers.insert("webhook-signature", signature.parse().ok()?);
    Some(headers)
}
