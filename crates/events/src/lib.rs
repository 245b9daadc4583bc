//! Outbound notification delivery for finished jobs.
//!
//! - [`WebhookDelivery`]: POSTs a job's result payload to the caller's
//!   webhook with bounded linear-backoff retry.
//! - [`WebhookConfig`]: immutable retry/signing settings, read once at
//!   startup.
//! - [`delivery::signing`]: optional HMAC-SHA256 body signature.

pub mod delivery;

pub use delivery::webhook::{WebhookConfig, WebhookDelivery, WebhookError};
