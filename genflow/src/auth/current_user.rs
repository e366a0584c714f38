use axum::{extract::FromRequestParts, http::request::Parts};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, trace};

use crate::{
    AppState,
    db::models::credits::{LedgerEntryRequest, UsageReason},
    errors::{Error, Result},
    metrics,
    types::UserId,
};

/// The end user a request acts for, as asserted by the fronting proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: Option<String>,
}

/// Put the signup grant on the ledger and mark the profile.
///
/// Runs until the profile is marked, so a grant that failed on the first request is retried on a
/// later one; the ledger applies it at most once.
async fn grant_signup_credits(state: &AppState, user_id: UserId) -> Result<()> {
    let amount = state.config.credits.initial_credits;
    if amount <= Decimal::ZERO {
        return Ok(());
    }

    let granted = state
        .stores
        .ledger
        .add_once(LedgerEntryRequest::new(user_id, amount, UsageReason::SignupGrant))
        .await?;
    if let Some(balance) = granted {
        metrics::record_credits_granted("signup_grant", amount);
        info!(user_id = %user_id, %amount, %balance, "Granted signup credits");
    }

    state.stores.profiles.mark_signup_granted(user_id).await?;
    Ok(())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let proxy = &state.config.auth.proxy_header;

        let Some(raw_id) = parts.headers.get(&proxy.header_name) else {
            trace!(header = %proxy.header_name, "No identity header on request");
            return Err(Error::Unauthenticated { message: None });
        };
        let id: UserId = raw_id
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| Error::Unauthenticated {
                message: Some(format!("{} must carry a user id", proxy.header_name)),
            })?;
        let email = parts
            .headers
            .get(&proxy.email_header_name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if !proxy.auto_create_users {
            let profile = state.stores.profiles.get(id).await?.ok_or_else(|| Error::Unauthenticated {
                message: Some("Unknown user".to_string()),
            })?;
            return Ok(Self {
                id,
                email: profile.email.or(email),
            });
        }

        let (profile, created) = state.stores.profiles.get_or_create(id, email.clone()).await?;
        if created {
            debug!(user_id = %id, "Created profile for new user");
        }
        if profile.signup_granted_at.is_none() {
            grant_signup_credits(state, id).await?;
        }

        Ok(Self {
            id,
            email: profile.email.or(email),
        })
    }
}
