//! HTTP handlers for the caller's credit balance and ledger history.

use crate::{
    AppState,
    api::models::{
        credits::{BalanceResponse, UsageEventResponse},
        pagination::Pagination,
    },
    auth::current_user::CurrentUser,
    errors::Result,
};
use axum::{
    extract::{Query, State},
    response::Json,
};

#[utoipa::path(
    get,
    path = "/credits/balance",
    tag = "credits",
    summary = "Get the current credit balance",
    responses(
        (status = 200, description = "Balance", body = BalanceResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_balance(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<BalanceResponse>> {
    let balance = state.stores.ledger.balance(current_user.id).await?;
    Ok(Json(BalanceResponse {
        user_id: current_user.id,
        balance,
    }))
}

/// Ledger mutations, newest first
#[utoipa::path(
    get,
    path = "/credits/events",
    tag = "credits",
    summary = "List usage events",
    params(Pagination),
    responses(
        (status = 200, description = "Usage events", body = [UsageEventResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_usage_events(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<UsageEventResponse>>> {
    let (skip, limit) = pagination.params();
    let events = state.stores.ledger.list_events(current_user.id, skip, limit).await?;
    Ok(Json(events.into_iter().map(UsageEventResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use crate::{
        db::models::credits::{LedgerEntryRequest, UsageReason},
        test_utils::{TEST_USER_HEADER, TestHarness, test_config},
    };
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_balance_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        let user = Uuid::new_v4();
        let ledger = &harness.state.stores.ledger;
        ledger
            .add(LedgerEntryRequest::new(user, Decimal::from(10), UsageReason::SubscriptionGrant))
            .await
            .unwrap();
        ledger
            .consume(LedgerEntryRequest::new(user, Decimal::new(5, 1), UsageReason::JobConsume))
            .await
            .unwrap();

        let body: Value = server
            .get("/api/v1/credits/balance")
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .json();
        assert_eq!(body, json!({"user_id": user, "balance": 9.5}));

        let events: Value = server
            .get("/api/v1/credits/events")
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .json();
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["reason"], "job_consume");
        assert_eq!(events[0]["delta"], -0.5);
        assert_eq!(events[0]["balance_after"], 9.5);
        assert_eq!(events[1]["reason"], "subscription_grant");
    }
}
