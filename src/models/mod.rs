//! Data models for the blood request mirror.

mod document;
mod request;
mod snapshot;
mod status;

pub use document::*;
pub use request::*;
pub use snapshot::*;
pub use status::*;
