//! Job orchestration and the hand-off to delivery.
//!
//! - [`models`]: collaborator traits for every external model, plus
//!   [`ModelServerClient`](model_server::ModelServerClient), an HTTP
//!   implementation of all of them.
//! - [`orchestrator`]: [`PredictionOrchestrator`], which runs a job's
//!   stages and produces its result envelope.
//! - [`queue`]: [`DeliveryQueue`], the bounded mailbox between
//!   orchestration tasks and the single upload worker.

pub mod model_server;
pub mod models;
pub mod orchestrator;
pub mod queue;

pub use model_server::ModelServerClient;
pub use models::{ModelError, ModelSet};
pub use orchestrator::{ImagePrediction, PipelineError, PredictionOrchestrator, Stage};
pub use queue::{
    DeliveryQueue, DeliveryQueueReceiver, DeliveryQueueSender, QueueError, DEFAULT_QUEUE_CAPACITY,
    MAX_QUEUE_CAPACITY,
};
