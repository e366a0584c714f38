//! API request and response data models.
//!
//! - [`jobs`]: job creation, job descriptors and result links
//! - [`images`]: uploaded source images
//! - [`credits`]: balances and usage events
//! - [`pagination`]: shared `skip`/`limit` query parameters

pub mod credits;
pub mod images;
pub mod jobs;
pub mod pagination;
