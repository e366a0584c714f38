//! Billing provider webhooks.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::AppState;

/// Receive a billing event.
///
/// The signature is verified before anything else happens. A failure while applying the event
/// answers 500 so that the provider redelivers it.
#[utoipa::path(
    post,
    path = "/webhooks/billing",
    tag = "webhooks",
    summary = "Billing provider webhook",
    request_body(content = String, description = "Provider event, verified against its signature headers"),
    responses(
        (status = 200, description = "Event received"),
        (status = 400, description = "Invalid signature or payload"),
        (status = 404, description = "Billing is not configured"),
        (status = 500, description = "Event could not be applied"),
    )
)]
#[instrument(skip_all)]
pub async fn billing_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let Some(billing) = state.billing.as_ref() else {
        warn!("Billing webhook called but billing is not configured");
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Billing is not configured" }))).into_response();
    };

    let event = match billing.provider.validate_webhook(&headers, &body).await {
        Ok(event) => event,
        Err(e) => {
            warn!(provider = billing.provider.name(), error = %e, "Rejected billing webhook");
            return (StatusCode::from(&e), Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    if let Err(e) = billing.consumer.handle(&event).await {
        let status = StatusCode::from(&e);
        if status.is_server_error() {
            tracing::error!(event_id = %event.id, error = %e, "Failed to apply billing event");
        } else {
            warn!(event_id = %event.id, error = %e, "Billing event not applicable");
        }
        return (status, Json(json!({ "error": e.to_string() }))).into_response();
    }

    info!(event_id = %event.id, "Processed billing webhook");
    (StatusCode::OK, Json(json!({ "received": true }))).into_response()
}

#[cfg(test)]
mod tests {
    use crate::{
        billing::dummy::signed_headers,
        config::{BillingConfig, BillingProviderConfig, DummyConfig},
        test_utils::{TEST_WEBHOOK_SECRET, TestHarness, test_config},
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn billing_harness(dir: &std::path::Path) -> (TestHarness, TestServer) {
        let mut config = test_config(dir);
        config.billing = Some(BillingConfig {
            provider: BillingProviderConfig::Dummy(DummyConfig {
                webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            }),
            plans: HashMap::from([("price_pro".to_string(), Decimal::from(600))]),
        });
        let harness = TestHarness::new(config);
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        (harness, server)
    }

    async fn post_event(server: &TestServer, id: &str, body: &Value, secret: &str) -> axum_test::TestResponse {
        let body = body.to_string();
        let headers = signed_headers(id, &body, secret).unwrap();
        let mut request = server.post("/webhooks/billing").text(body);
        for (name, value) in headers.iter() {
            request = request.add_header(name.clone(), value.clone());
        }
        request.await
    }

    #[tokio::test]
    async fn test_unconfigured_billing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();

        server.post("/webhooks/billing").text("{}").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_bad_signature_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (harness, server) = billing_harness(dir.path());
        let user = Uuid::new_v4();
        let event = json!({"type": "subscription_started", "data": {"user_id": user, "customer_id": "cus_1", "subscription_id": "sub_1", "price_id": "price_pro"}});

        let response = post_event(&server, "msg_1", &event, "whsec_dGhpcyBpcyBhIGRpZmZlcmVudCBzZWNyZXQ=").await;
        response.assert_status_bad_request();

        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::ZERO);
        assert!(harness.state.stores.profiles.get(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_start_grants_credits() {
        let dir = tempfile::tempdir().unwrap();
        let (harness, server) = billing_harness(dir.path());
        let user = Uuid::new_v4();
        let event = json!({"type": "subscription_started", "data": {"user_id": user, "customer_id": "cus_1", "subscription_id": "sub_1", "price_id": "price_pro"}});

        let response = post_event(&server, "msg_1", &event, TEST_WEBHOOK_SECRET).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({"received": true}));
        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::from(600));
    }

    #[tokio::test]
    async fn test_unknown_plan_asks_for_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let (harness, server) = billing_harness(dir.path());
        let user = Uuid::new_v4();
        let event = json!({"type": "subscription_started", "data": {"user_id": user, "customer_id": null, "subscription_id": null, "price_id": "price_gold"}});

        post_event(&server, "msg_2", &event, TEST_WEBHOOK_SECRET)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_renewal_on_unconfigured_price_asks_for_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let (harness, server) = billing_harness(dir.path());
        let user = Uuid::new_v4();

        let start = json!({"type": "subscription_started", "data": {"user_id": user, "customer_id": "cus_1", "subscription_id": "sub_1", "price_id": "price_pro"}});
        post_event(&server, "msg_start", &start, TEST_WEBHOOK_SECRET).await.assert_status_ok();

        let renewal = json!({"type": "recurring_payment_succeeded", "data": {"customer_id": "cus_1", "subscription_id": "sub_1", "price_id": "price_new"}});
        let response = post_event(&server, "msg_renewal", &renewal, TEST_WEBHOOK_SECRET).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json::<Value>()["error"].as_str().unwrap().contains("price_new"));

        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::from(600));
    }

    #[tokio::test]
    async fn test_renewal_for_unknown_subscription_asks_for_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let (_harness, server) = billing_harness(dir.path());
        let event = json!({"type": "recurring_payment_succeeded", "data": {"customer_id": "cus_x", "subscription_id": "sub_x", "price_id": "price_pro"}});

        post_event(&server, "msg_3", &event, TEST_WEBHOOK_SECRET)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let (_harness, server) = billing_harness(dir.path());

        post_event(&server, "msg_4", &json!({"type": "invoice_created", "data": {}}), TEST_WEBHOOK_SECRET)
            .await
            .assert_status_ok();
    }
}
