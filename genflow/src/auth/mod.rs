//! Request authentication.
//!
//! genflow sits behind an authenticating reverse proxy. End users are identified by the headers
//! that proxy injects ([`current_user::CurrentUser`]); the worker endpoint is authenticated with
//! a shared service token instead ([`require_service_token`]), never with an end-user identity.

pub mod current_user;

use axum::http::{HeaderMap, header::AUTHORIZATION};

use crate::{
    billing::signing::constant_time_eq,
    errors::{Error, Result},
};

/// Check the `Authorization: Bearer <token>` header against the configured service token
pub fn require_service_token(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let unauthenticated = || Error::Unauthenticated {
        message: Some("Invalid service token".to_string()),
    };

    let expected = expected.filter(|token| !token.is_empty()).ok_or_else(unauthenticated)?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(unauthenticated)?;

    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(unauthenticated())
    }
}
