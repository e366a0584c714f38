//! Common type definitions shared across the crate.
//!
//! All entity IDs are UUIDs wrapped in type aliases so signatures read in terms of what they
//! identify:
//!
//! - [`UserId`]: End-user account identifier (as asserted by the auth proxy)
//! - [`JobId`]: Generation job identifier
//! - [`ImageId`]: Uploaded source image identifier
//! - [`FolderId`]: Client-side folder grouping for uploads and results
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

pub type UserId = Uuid;
pub type JobId = Uuid;
pub type ImageId = Uuid;
pub type FolderId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Render a credit amount as a JSON number: whole amounts become integers (`1`, not `"1.00"`),
/// fractional amounts become floats (`0.5`).
pub fn credits_to_json(amount: Decimal) -> serde_json::Value {
    let normalized = amount.normalize();
    if normalized.scale() == 0
        && let Some(whole) = normalized.to_i64()
    {
        return serde_json::Value::from(whole);
    }
    normalized.to_f64().map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
}

/// `#[serde(serialize_with = ...)]` adapter for credit amounts, see [`credits_to_json`].
pub fn serialize_credits<S>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde::Serialize::serialize(&credits_to_json(*amount), serializer)
}
