//! Database record structures matching table schemas.

pub mod credits;
pub mod images;
pub mod jobs;
pub mod profiles;
