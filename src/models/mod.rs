//! Data models for the revision backend.

mod event;
mod kind;
pub mod payload;
mod revision;
mod snapshot;

pub use event::*;
pub use kind::*;
pub use payload::LivePayload;
pub use revision::*;
pub use snapshot::*;
