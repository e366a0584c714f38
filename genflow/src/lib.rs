//! # genflow: generation jobs paid for with credits
//!
//! `genflow` accepts image and video generation requests from end users, charges them credits,
//! runs the generation against an external AI provider, and stores the results where the user can
//! fetch them through temporary signed links. Credits come from signup grants and from billing
//! provider webhooks (subscription starts and renewals).
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) and persists to
//! PostgreSQL (or, for development and tests, to in-process memory).
//!
//! ### Job lifecycle
//!
//! A job request is validated, the caller's images are checked for ownership, and the job's cost
//! is consumed from the credit ledger in a single conditional update. Only then is the job row
//! written (`pending`) and its id handed to a worker, either in process or over HTTP to
//! `/internal/worker/jobs`. The worker claims the job (`processing`), resolves the source images
//! to signed URLs, calls the provider, copies the outputs into object storage, and completes or
//! fails the job. Clients poll `/api/v1/jobs/{id}` or stream `/api/v1/jobs/{id}/events`.
//!
//! ### Core Components
//!
//! - [`dispatcher`]: job creation, the synchronous half
//! - [`worker`]: the asynchronous half, and the triggers that cross between them
//! - [`generation`]: model selection and pricing, request building, providers
//! - [`db`]: the credit ledger, job, profile and source image stores
//! - [`storage`]: object storage for uploads and results
//! - [`billing`]: webhook verification and the events that grant credits
//! - [`auth`]: the proxy-asserted end-user identity and the worker service token
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use genflow::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = genflow::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     genflow::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod generation;
mod metrics;
mod openapi;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{self, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers,
    billing::Billing,
    config::{CorsOrigin, DatabaseConfig, PoolSettings},
    db::stores::Stores,
    events::JobEventHub,
    generation::{GenerationProvider, RequestBuilder},
    openapi::{ApiDoc, InternalApiDoc},
    storage::ObjectStore,
    worker::{HttpWorkerTrigger, LocalWorkerTrigger, ResultMaterializer, Worker, WorkerTrigger},
};

pub use types::{FolderId, ImageId, JobId, UserId};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .stores(Stores::in_memory())
///     .objects(objects)
///     .worker(worker)
///     .trigger(trigger)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub objects: Arc<dyn ObjectStore>,
    /// Runs jobs claimed through `/internal/worker/jobs`
    pub worker: Worker,
    /// How the dispatcher hands a new job to a worker
    pub trigger: Arc<dyn WorkerTrigger>,
    #[builder(default)]
    pub events: JobEventHub,
    pub billing: Option<Billing>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Get the genflow database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Wire the job pipeline and optional services over already-built backends.
///
/// Jobs are triggered over HTTP when `worker.trigger_url` is configured, otherwise in process.
pub fn build_state(
    config: Config,
    stores: Stores,
    objects: Arc<dyn ObjectStore>,
    provider: Arc<dyn GenerationProvider>,
) -> anyhow::Result<AppState> {
    let http = reqwest::Client::builder().timeout(Duration::from_secs(120)).build()?;
    let events = JobEventHub::default();

    let worker = Worker::new(
        stores.jobs.clone(),
        RequestBuilder::new(stores.images.clone(), objects.clone(), config.generation.clone()),
        provider,
        ResultMaterializer::new(http.clone(), objects.clone()),
        events.clone(),
    );

    let trigger: Arc<dyn WorkerTrigger> = match (&config.worker.trigger_url, &config.worker.service_token) {
        (Some(_), Some(token)) => {
            let url = config.worker_trigger_url();
            info!(url = %url, "Triggering workers over HTTP");
            Arc::new(HttpWorkerTrigger::new(http, url, token.clone()))
        }
        (Some(_), None) => anyhow::bail!("worker.trigger_url requires worker.service_token"),
        (None, _) => {
            info!("Running workers in process");
            Arc::new(LocalWorkerTrigger::new(worker.clone()))
        }
    };

    let billing = config
        .billing
        .as_ref()
        .map(|billing| Billing::new(billing, &stores))
        .transpose()?;
    let metrics_handle = if config.enable_metrics {
        Some(metrics::prometheus_handle()?)
    } else {
        None
    };

    Ok(AppState::builder()
        .config(config)
        .stores(stores)
        .objects(objects)
        .worker(worker)
        .trigger(trigger)
        .events(events)
        .maybe_billing(billing)
        .maybe_metrics_handle(metrics_handle)
        .build())
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .allow_headers([
            http::header::CONTENT_TYPE,
            http::HeaderName::try_from(config.auth.proxy_header.header_name.as_str())?,
        ])
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics_handle.as_ref() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// Build the application router.
///
/// - `/api/v1/*`: the end-user API
/// - `/internal/worker/jobs`, `/webhooks/billing`: service-to-service endpoints
/// - `/storage/{*key}`: signed reads when objects are stored locally
/// - `/docs`, `/internal/docs`: rendered API documentation
/// - `/internal/metrics`: Prometheus exposition, when enabled
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_routes = Router::new()
        .route("/images", post(handlers::images::upload_image))
        .layer(DefaultBodyLimit::max(handlers::images::MAX_IMAGE_BYTES + 64 * 1024));

    let api_routes = Router::new()
        .route("/jobs", post(handlers::jobs::create_job).get(handlers::jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(handlers::jobs::get_job)
                .patch(handlers::jobs::update_job)
                .delete(handlers::jobs::delete_job),
        )
        .route("/jobs/{id}/result", get(handlers::jobs::get_job_result))
        .route("/jobs/{id}/events", get(handlers::jobs::job_events))
        .merge(upload_routes)
        .route("/credits/balance", get(handlers::credits::get_balance))
        .route("/credits/events", get(handlers::credits::list_usage_events))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/internal/worker/jobs", post(handlers::worker::trigger_job))
        .route("/webhooks/billing", post(handlers::webhooks::billing_webhook))
        .route("/storage/{*key}", get(handlers::storage::serve_object))
        .nest("/api/v1", api_routes);

    if state.metrics_handle.is_some() {
        router = router.route("/internal/metrics", get(render_metrics));
    }

    let router = router
        .with_state(state.clone())
        .route("/internal/openapi.json", get(|| async { Json(InternalApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .merge(Scalar::with_url("/internal/docs", InternalApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

async fn connect_postgres(url: &str, pool: &PoolSettings) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(pool.max_connections)
        .min_connections(pool.min_connections)
        .acquire_timeout(Duration::from_secs(pool.acquire_timeout_secs))
        .connect(url)
        .await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

/// A configured application, ready to serve
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<sqlx::PgPool>,
}

impl Application {
    /// Connect to the configured backends and build the router
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting genflow with configuration: {:#?}", config);

        let (stores, pool) = match &config.database {
            DatabaseConfig::Postgres { url, pool } => {
                info!("Using postgres database");
                let pool = connect_postgres(url, pool).await?;
                (Stores::postgres(pool.clone()), Some(pool))
            }
            DatabaseConfig::Memory => {
                tracing::warn!("Using in-memory stores: data is lost on shutdown");
                (Stores::in_memory(), None)
            }
        };

        let objects = storage::create_object_store(&config.storage, &config.public_url).await?;
        let provider = generation::create_provider(&config.generation)?;
        let state = build_state(config.clone(), stores, objects, provider)?;
        let router = build_router(&state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("genflow listening on http://{}, public URL {}", bind_addr, self.config.public_url);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
