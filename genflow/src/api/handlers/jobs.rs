//! HTTP handlers for generation jobs.

use crate::{
    AppState,
    api::models::{
        jobs::{JobCreate, JobCreated, JobResponse, JobUpdate, ResultLink},
        pagination::{PaginatedResponse, Pagination},
    },
    auth::current_user::CurrentUser,
    db::{errors::DbError, models::jobs::{JobDBResponse, JobStatus}},
    dispatcher,
    errors::{Error, Result},
    events::JobEvent,
    types::JobId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        Json,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
};
use futures::{Stream, StreamExt, stream};
use std::pin::Pin;

fn job_not_found(id: JobId) -> Error {
    Error::NotFound {
        resource: "Job".to_string(),
        id: id.to_string(),
    }
}

/// Jobs of other users are reported as missing
async fn owned_job(state: &AppState, id: JobId, user: &CurrentUser) -> Result<JobDBResponse> {
    state
        .stores
        .jobs
        .get(id)
        .await?
        .filter(|job| job.user_id == user.id)
        .ok_or_else(|| job_not_found(id))
}

fn map_missing(id: JobId) -> impl FnOnce(DbError) -> Error {
    move |e| match e {
        DbError::NotFound => job_not_found(id),
        other => other.into(),
    }
}

/// Create a generation job
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    summary = "Create a generation job",
    description = "Reserves the job's credits, persists it as pending and hands it to a worker. \
                   Processing continues asynchronously; poll the job or subscribe to its events.",
    request_body = JobCreate,
    responses(
        (status = 201, description = "Job created", body = JobCreated),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient credits"),
        (status = 404, description = "Image not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_job(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<JobCreate>,
) -> Result<(StatusCode, Json<JobCreated>)> {
    let job = dispatcher::create_job(&state, current_user.id, request).await?;
    Ok((StatusCode::CREATED, Json(JobCreated::from(&job))))
}

/// List the caller's jobs, newest first
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "jobs",
    summary = "List jobs",
    params(Pagination),
    responses(
        (status = 200, description = "Paginated jobs", body = PaginatedResponse<JobResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_jobs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<JobResponse>>> {
    let (skip, limit) = pagination.params();
    let (jobs, total) = state.stores.jobs.list_for_user(current_user.id, skip, limit).await?;

    Ok(Json(PaginatedResponse::new(
        jobs.into_iter().map(JobResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/jobs/{id}",
    tag = "jobs",
    summary = "Get a job",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<JobId>, current_user: CurrentUser) -> Result<Json<JobResponse>> {
    Ok(Json(owned_job(&state, id, &current_user).await?.into()))
}

#[utoipa::path(
    patch,
    path = "/jobs/{id}",
    tag = "jobs",
    summary = "Rename a job",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    request_body = JobUpdate,
    responses(
        (status = 200, description = "Renamed job", body = JobResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    current_user: CurrentUser,
    Json(update): Json<JobUpdate>,
) -> Result<Json<JobResponse>> {
    let name = update.name.map(|name| name.trim().to_string()).filter(|name| !name.is_empty());
    let job = state
        .stores
        .jobs
        .rename(id, current_user.id, name)
        .await
        .map_err(map_missing(id))?;
    Ok(Json(job.into()))
}

/// Only failed jobs can be deleted
#[utoipa::path(
    delete,
    path = "/jobs/{id}",
    tag = "jobs",
    summary = "Delete a failed job",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job is not failed"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
pub async fn delete_job(State(state): State<AppState>, Path(id): Path<JobId>, current_user: CurrentUser) -> Result<StatusCode> {
    state
        .stores
        .jobs
        .delete_failed(id, current_user.id)
        .await
        .map_err(map_missing(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Signed, expiring link to the job's first result
#[utoipa::path(
    get,
    path = "/jobs/{id}/result",
    tag = "jobs",
    summary = "Get a temporary link to the result",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Signed result link", body = ResultLink),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job has not completed"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    current_user: CurrentUser,
) -> Result<Json<ResultLink>> {
    let job = owned_job(&state, id, &current_user).await?;
    let key = match (job.status, job.result_path) {
        (JobStatus::Completed, Some(key)) => key,
        (status, _) => {
            return Err(Error::Conflict {
                message: format!("Job {id} is {status}, results are available once completed"),
            });
        }
    };

    let signed = state.objects.signed_url(&key, state.config.generation.signed_url_ttl).await?;
    Ok(Json(ResultLink {
        url: signed.url,
        expires_at: signed.expires_at,
    }))
}

type EventStream = Pin<Box<dyn Stream<Item = std::result::Result<Event, axum::Error>> + Send>>;

/// Server-sent status changes for one job
#[utoipa::path(
    get,
    path = "/jobs/{id}/events",
    tag = "jobs",
    summary = "Stream job status changes",
    description = "Server-sent events, one `status` event per change, starting with the current state. \
                   The stream ends after the job completes or fails.",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Event stream of JobEvent", content_type = "text/event-stream", body = JobEvent),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
    ),
    security(("X-Genflow-User" = []))
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
pub async fn job_events(State(state): State<AppState>, Path(id): Path<JobId>, current_user: CurrentUser) -> Result<Sse<KeepAliveStream<EventStream>>> {
    // Subscribe before reading the job so no change between the two is missed
    let updates = state.events.subscribe(id);
    let job = owned_job(&state, id, &current_user).await?;

    let current = JobEvent::from(&job);
    let events = if job.status.is_terminal() {
        stream::once(async move { current }).boxed()
    } else {
        stream::once(async move { current }).chain(updates).boxed()
    };

    let stream: EventStream = Box::pin(events.map(|event| Event::default().event("status").json_data(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use crate::{
        db::models::{
            credits::{LedgerEntryRequest, UsageReason},
            jobs::JobCreateDBRequest,
        },
        test_utils::{TEST_USER_HEADER, TestHarness, test_config},
    };
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use uuid::Uuid;

    async fn setup() -> (tempfile::TempDir, TestHarness, TestServer) {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        (dir, harness, server)
    }

    async fn insert_job(harness: &TestHarness, user: Uuid) -> Uuid {
        let job = harness
            .state
            .stores
            .jobs
            .create(JobCreateDBRequest {
                id: Uuid::new_v4(),
                user_id: user,
                image_ids: vec![Uuid::new_v4()],
                prompt: "a lighthouse".to_string(),
                model: "nano-banana".to_string(),
                style: None,
                folder_id: None,
                name: None,
                num_outputs: 1,
                aspect_ratio: None,
                credits_used: Decimal::ONE,
            })
            .await
            .unwrap();
        job.id
    }

    #[tokio::test]
    async fn test_jobs_require_identity() {
        let (_dir, _harness, server) = setup().await;
        server.get("/api/v1/jobs").await.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn test_other_users_jobs_are_not_found() {
        let (_dir, harness, server) = setup().await;
        let owner = Uuid::new_v4();
        let job_id = insert_job(&harness, owner).await;

        server
            .get(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, Uuid::new_v4().to_string())
            .await
            .assert_status_not_found();

        let response = server
            .get(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, owner.to_string())
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["credits_used"], 1);
    }

    #[tokio::test]
    async fn test_list_is_paginated_and_scoped() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        for _ in 0..3 {
            insert_job(&harness, user).await;
        }
        insert_job(&harness, Uuid::new_v4()).await;

        let body: Value = server
            .get("/api/v1/jobs")
            .add_query_param("limit", 2)
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .json();
        assert_eq!(body["total_count"], 3);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["limit"], 2);
    }

    #[tokio::test]
    async fn test_rename_and_clear_name() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let job_id = insert_job(&harness, user).await;

        let body: Value = server
            .patch(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .json(&json!({"name": "  Beach  "}))
            .await
            .json();
        assert_eq!(body["name"], "Beach");

        let body: Value = server
            .patch(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .json(&json!({"name": null}))
            .await
            .json();
        assert_eq!(body["name"], Value::Null);
    }

    #[tokio::test]
    async fn test_delete_only_failed_jobs() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let job_id = insert_job(&harness, user).await;

        server
            .delete(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .assert_status(axum::http::StatusCode::CONFLICT);

        let jobs = &harness.state.stores.jobs;
        jobs.claim(job_id).await.unwrap();
        jobs.fail(job_id, "provider exploded".to_string()).await.unwrap();

        server
            .delete(&format!("/api/v1/jobs/{job_id}"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);
        assert!(jobs.get(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_result_link_requires_completion() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let job_id = insert_job(&harness, user).await;

        server
            .get(&format!("/api/v1/jobs/{job_id}/result"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .await
            .assert_status(axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_events_for_finished_job_replay_final_state() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let job_id = insert_job(&harness, user).await;
        let jobs = &harness.state.stores.jobs;
        jobs.claim(job_id).await.unwrap();
        jobs.fail(job_id, "no images generated".to_string()).await.unwrap();

        let response = server
            .get(&format!("/api/v1/jobs/{job_id}/events"))
            .add_header(TEST_USER_HEADER, user.to_string())
            .await;
        response.assert_status_ok();
        let text = response.text();
        assert!(text.contains("event: status"));
        assert!(text.contains(r#""status":"failed""#));
        assert!(text.contains("no images generated"));
    }

    #[tokio::test]
    async fn test_insufficient_credits_creates_nothing() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let image_id = harness.upload_image(user, None).await;
        harness
            .state
            .stores
            .ledger
            .add(LedgerEntryRequest::new(user, Decimal::from(5), UsageReason::SubscriptionGrant))
            .await
            .unwrap();

        let response = server
            .post("/api/v1/jobs")
            .add_header(TEST_USER_HEADER, user.to_string())
            .json(&json!({
                "image_ids": [image_id],
                "prompt": "make it dramatic",
                "model": "gpt-image-1-high-square",
            }))
            .await;

        response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.json::<Value>(),
            json!({"error": "Insufficient credits", "available": 5, "required": 7})
        );
        let (jobs, total) = harness.state.stores.jobs.list_for_user(user, 0, 10).await.unwrap();
        assert!(jobs.is_empty());
        assert_eq!(total, 0);
        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let image_id = harness.upload_image(user, None).await;

        for body in [
            json!({"image_ids": [image_id], "prompt": "   "}),
            json!({"image_ids": [], "prompt": "x"}),
            json!({"image_ids": [image_id], "prompt": "x", "num_outputs": 0}),
            json!({"image_ids": [image_id], "prompt": "x", "num_outputs": 5}),
            json!({"image_ids": [image_id], "prompt": "x", "model": "dall-e-9"}),
            json!({"image_ids": [image_id], "prompt": "x", "model": "gpt-image-1-ultra-square"}),
        ] {
            server
                .post("/api/v1/jobs")
                .add_header(TEST_USER_HEADER, user.to_string())
                .json(&body)
                .await
                .assert_status_bad_request();
        }
    }

    #[tokio::test]
    async fn test_foreign_image_is_not_found() {
        let (_dir, harness, server) = setup().await;
        let user = Uuid::new_v4();
        let foreign = harness.upload_image(Uuid::new_v4(), None).await;
        harness
            .state
            .stores
            .ledger
            .add(LedgerEntryRequest::new(user, Decimal::from(10), UsageReason::SubscriptionGrant))
            .await
            .unwrap();

        server
            .post("/api/v1/jobs")
            .add_header(TEST_USER_HEADER, user.to_string())
            .json(&json!({"image_ids": [foreign], "prompt": "x"}))
            .await
            .assert_status_not_found();
        assert_eq!(harness.state.stores.ledger.balance(user).await.unwrap(), Decimal::from(10));
    }
}
