//! The genrelay worker process.
//!
//! - [`config`]: [`WorkerConfig`], everything read from the environment at
//!   startup.
//! - [`intake`]: the HTTP surface that accepts prediction jobs.
//! - [`upload_worker`]: [`UploadWorker`], the single consumer that uploads
//!   artifacts and delivers webhooks.

pub mod config;
pub mod intake;
pub mod upload_worker;

pub use config::{LogFormat, WorkerConfig};
pub use intake::IntakeState;
pub use upload_worker::UploadWorker;
