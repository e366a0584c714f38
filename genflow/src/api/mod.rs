//! HTTP surface.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: request and response bodies, kept separate from the database models
//!
//! # API Structure
//!
//! - **Jobs** (`/api/v1/jobs/*`): create, inspect, rename and delete generation jobs, fetch a
//!   signed result link, stream status changes
//! - **Images** (`/api/v1/images`): upload source images
//! - **Credits** (`/api/v1/credits/*`): balance and ledger history
//! - **Worker** (`/internal/worker/jobs`): service-authenticated job trigger
//! - **Webhooks** (`/webhooks/billing`): billing provider events
//! - **Storage** (`/storage/{*key}`): signed reads for the local object store
//!
//! Endpoints are documented with `utoipa`; the rendered docs live at `/docs`.

pub mod handlers;
pub mod models;
