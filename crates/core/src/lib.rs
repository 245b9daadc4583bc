//! Shared domain types for the genrelay inference pipeline.
//!
//! - [`job`]: inbound job descriptions (image and voiceover).
//! - [`artifact`]: in-memory media produced by the models, not yet uploaded.
//! - [`envelope`]: the per-job carrier threaded from orchestration into
//!   delivery, and the wire payload it turns into.
//! - [`config`]: environment helpers used by every `from_env` constructor.

pub mod artifact;
pub mod config;
pub mod envelope;
pub mod error;
pub mod job;
pub mod types;

pub use envelope::{Deliverable, DeliveryPayload, ResultEnvelope, Status};
pub use error::CoreError;
pub use job::{Job, JobKind};
