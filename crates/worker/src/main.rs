use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use genrelay_cloud::encode::AudioTranscoder;
use genrelay_cloud::{build_store, ArtifactUploader};
use genrelay_events::WebhookDelivery;
use genrelay_pipeline::{DeliveryQueue, ModelServerClient, ModelSet, PredictionOrchestrator};
use genrelay_worker::intake::{self, IntakeState};
use genrelay_worker::{LogFormat, UploadWorker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "genrelay_worker=info,genrelay_pipeline=info,genrelay_cloud=info,genrelay_events=info";

/// How long to wait for the upload worker after the server stops.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing(LogFormat::from_env());

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    let addr = config.bind_addr()?;
    tracing::info!(
        %addr,
        model_server = %config.model_server_url,
        queue_capacity = config.queue_capacity,
        "Loaded worker configuration",
    );

    // --- Delivery side ---
    let store = build_store(&config.storage).await;
    tracing::info!(backend = store.name(), "Storage backend ready");
    let uploader = ArtifactUploader::new(store, AudioTranscoder::new(config.ffmpeg_path.clone()));
    let webhook = WebhookDelivery::new(config.webhook.clone())
        .context("Failed to build webhook client")?;

    // --- Orchestration side ---
    let model_server = ModelServerClient::new(config.model_server_url.clone())
        .context("Failed to build model server client")?;
    let orchestrator = Arc::new(PredictionOrchestrator::new(ModelSet::uniform(Arc::new(
        model_server,
    ))));

    // --- Upload worker ---
    let (queue_tx, queue_rx) = DeliveryQueue::bounded(config.queue_capacity);
    let cancel = CancellationToken::new();
    let worker = UploadWorker::new(queue_rx, uploader, webhook).with_poll_timeout(config.poll_timeout);
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    // --- Start server ---
    let app = intake::router(IntakeState::new(orchestrator, queue_tx));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, "Intake server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Intake stopped, waiting for upload worker");
    cancel.cancel();
    match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker_handle).await {
        Ok(Ok(())) => tracing::info!("Upload worker stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Upload worker task failed"),
        Err(_) => tracing::warn!("Upload worker did not stop in time"),
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
