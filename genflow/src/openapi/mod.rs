//! OpenAPI documentation.
//!
//! Two documents, matching the two audiences:
//! - [`ApiDoc`]: the end-user API at `/api/v1/*`, authenticated by the proxy identity header
//! - [`InternalApiDoc`]: the worker trigger and billing webhooks

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    api::{handlers, models},
    db::models::{credits::UsageReason, jobs::JobStatus},
    events::JobEvent,
};

struct UserSecurityAddon;

impl Modify for UserSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Genflow-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-genflow-user",
                    "User id asserted by the authenticating proxy. The header name is configurable.",
                ))),
            );
        }
    }
}

struct ServiceSecurityAddon;

impl Modify for ServiceSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "ServiceToken".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("The configured `worker.service_token`"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "genflow API",
        description = "Image and video generation jobs paid for with credits.",
    ),
    servers((url = "/api/v1")),
    paths(
        handlers::jobs::create_job,
        handlers::jobs::list_jobs,
        handlers::jobs::get_job,
        handlers::jobs::update_job,
        handlers::jobs::delete_job,
        handlers::jobs::get_job_result,
        handlers::jobs::job_events,
        handlers::images::upload_image,
        handlers::credits::get_balance,
        handlers::credits::list_usage_events,
    ),
    components(schemas(
        models::jobs::JobCreate,
        models::jobs::JobCreated,
        models::jobs::JobResponse,
        models::jobs::JobUpdate,
        models::jobs::ResultLink,
        models::pagination::PaginatedResponse<models::jobs::JobResponse>,
        models::images::SourceImageResponse,
        models::credits::BalanceResponse,
        models::credits::UsageEventResponse,
        JobStatus,
        JobEvent,
        UsageReason,
    )),
    modifiers(&UserSecurityAddon),
    tags(
        (name = "jobs", description = "Generation jobs"),
        (name = "images", description = "Source images"),
        (name = "credits", description = "Credit balance and ledger history"),
    )
)]
pub struct ApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(title = "genflow internal API"),
    paths(handlers::worker::trigger_job, handlers::webhooks::billing_webhook),
    components(schemas(handlers::worker::WorkerJobRequest, handlers::worker::WorkerJobAccepted)),
    modifiers(&ServiceSecurityAddon),
    tags(
        (name = "worker", description = "Job processing trigger"),
        (name = "webhooks", description = "Billing provider webhooks"),
    )
)]
pub struct InternalApiDoc;
