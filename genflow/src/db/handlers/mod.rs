//! Postgres repositories, one per table.

pub mod credits;
pub mod images;
pub mod jobs;
pub mod profiles;

pub use credits::Credits;
pub use images::SourceImages;
pub use jobs::Jobs;
pub use profiles::Profiles;
