//! HTTP request handlers, organized by resource.
//!
//! - [`credits`]: balance and ledger history
//! - [`images`]: source image uploads
//! - [`jobs`]: job creation, inspection, renaming, deletion, result links and status streams
//! - [`storage`]: signed reads from the local object store
//! - [`webhooks`]: billing provider webhooks
//! - [`worker`]: the service-authenticated job trigger
//!
//! End-user handlers take a [`crate::auth::current_user::CurrentUser`], resolved from the
//! identity header set by the fronting proxy.

pub mod credits;
pub mod images;
pub mod jobs;
pub mod storage;
pub mod webhooks;
pub mod worker;
