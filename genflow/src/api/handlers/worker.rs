//! The worker trigger endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    AppState,
    auth::require_service_token,
    db::errors::DbError,
    errors::{Error, Result},
    types::JobId,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct WorkerJobRequest {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkerJobAccepted {
    pub success: bool,
    /// Always `null`: processing continues after the response
    pub result_path: Option<String>,
}

/// Claim a pending job and start processing it
#[utoipa::path(
    post,
    path = "/internal/worker/jobs",
    tag = "worker",
    summary = "Trigger processing of a job",
    description = "Authenticated with the service token, never with an end-user identity.",
    request_body = WorkerJobRequest,
    responses(
        (status = 202, description = "Job claimed, processing in the background", body = WorkerJobAccepted),
        (status = 401, description = "Invalid service token"),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Job is not pending"),
    ),
    security(("ServiceToken" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %request.job_id))]
pub async fn trigger_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WorkerJobRequest>,
) -> Result<(StatusCode, Json<WorkerJobAccepted>)> {
    require_service_token(&headers, state.config.worker.service_token.as_deref())?;

    state.worker.claim_and_spawn(request.job_id).await.map_err(|e| match e {
        DbError::NotFound => Error::NotFound {
            resource: "Job".to_string(),
            id: request.job_id.to_string(),
        },
        other => other.into(),
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(WorkerJobAccepted {
            success: true,
            result_path: None,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::{
        db::models::jobs::JobCreateDBRequest,
        test_utils::{TEST_SERVICE_TOKEN, TestHarness, test_config},
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use uuid::Uuid;

    async fn pending_job(harness: &TestHarness) -> Uuid {
        harness
            .state
            .stores
            .jobs
            .create(JobCreateDBRequest {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                image_ids: vec![Uuid::new_v4()],
                prompt: "a red door".to_string(),
                model: "nano-banana".to_string(),
                style: None,
                folder_id: None,
                name: None,
                num_outputs: 1,
                aspect_ratio: None,
                credits_used: Decimal::ONE,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_requires_service_token() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        let job_id = pending_job(&harness).await;

        server
            .post("/internal/worker/jobs")
            .json(&json!({ "job_id": job_id }))
            .await
            .assert_status_unauthorized();
        server
            .post("/internal/worker/jobs")
            .add_header("authorization", "Bearer not-the-token")
            .json(&json!({ "job_id": job_id }))
            .await
            .assert_status_unauthorized();

        let job = harness.state.stores.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status.as_str(), "pending");
    }

    #[tokio::test]
    async fn test_claims_once() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        let job_id = pending_job(&harness).await;

        let response = server
            .post("/internal/worker/jobs")
            .add_header("authorization", format!("Bearer {TEST_SERVICE_TOKEN}"))
            .json(&json!({ "job_id": job_id }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        assert_eq!(response.json::<Value>(), json!({"success": true, "result_path": null}));

        server
            .post("/internal/worker/jobs")
            .add_header("authorization", format!("Bearer {TEST_SERVICE_TOKEN}"))
            .json(&json!({ "job_id": job_id }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();

        server
            .post("/internal/worker/jobs")
            .add_header("authorization", format!("Bearer {TEST_SERVICE_TOKEN}"))
            .json(&json!({ "job_id": Uuid::new_v4() }))
            .await
            .assert_status_not_found();
    }
}
