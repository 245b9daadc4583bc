//! HTTP intake for prediction jobs.
//!
//! `POST /predictions` accepts a [`Job`], starts it on its own task and
//! answers `202 Accepted` with the job id. The result arrives later on the
//! job's webhook. `GET /health` is a liveness probe.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use genrelay_core::Job;
use genrelay_pipeline::{DeliveryQueueSender, PredictionOrchestrator};
use serde::Serialize;

/// Shared state for intake handlers.
#[derive(Clone)]
pub struct IntakeState {
    orchestrator: Arc<PredictionOrchestrator>,
    queue: DeliveryQueueSender,
}

impl IntakeState {
    pub fn new(orchestrator: Arc<PredictionOrchestrator>, queue: DeliveryQueueSender) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }
}

/// Body of a `202 Accepted` answer.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub id: String,
}

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

/// Build the intake router.
pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/predictions", post(create_prediction))
        .with_state(state)
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /predictions
async fn create_prediction(
    State(state): State<IntakeState>,
    Json(job): Json<Job>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let id = job.id().to_string();
    tracing::info!(job_id = %id, kind = job.kind().as_str(), "Prediction accepted");

    let job_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = state.orchestrator.submit(job, &state.queue).await {
            tracing::error!(job_id = %job_id, error = %e, "Result could not be queued for delivery");
        }
    });

    (StatusCode::ACCEPTED, Json(AcceptedResponse { id }))
}
