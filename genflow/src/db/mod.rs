//! Data persistence and access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, worker, billing consumer)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Stores    │  (db::stores - traits, Postgres or in-memory)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`stores`]: The traits the application is written against, and the [`stores::Stores`] bundle
//! - [`handlers`]: Postgres repositories, one per table
//! - [`models`]: Database record structures matching table schemas
//! - [`postgres`] / [`in_memory`]: The two store backends
//! - [`errors`]: Database-specific error types
//!
//! # Repositories
//!
//! Repositories borrow a connection for their lifetime. Operations that must be atomic open a
//! transaction on that connection themselves:
//!
//! ```ignore
//! let mut conn = pool.acquire().await?;
//! let balance_after = Credits::new(&mut conn).consume(&request).await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are run at startup via [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod stores;
