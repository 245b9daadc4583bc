//! The single consumer of the delivery queue.
//!
//! For every envelope, [`UploadWorker`] uploads any pending artifacts,
//! strips the internal fields and POSTs the payload to the caller's
//! webhook. Upload and delivery failures are recorded or logged, never
//! propagated: the loop only ends on shutdown or when every producer is
//! gone.

use std::time::{Duration, Instant};

use genrelay_cloud::ArtifactUploader;
use genrelay_core::{Deliverable, ResultEnvelope};
use genrelay_events::{WebhookDelivery, WebhookError};
use genrelay_pipeline::{DeliveryQueueReceiver, QueueError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default wait on an empty queue before checking for shutdown.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Uploads artifacts and delivers webhooks for finished jobs.
pub struct UploadWorker {
    queue: DeliveryQueueReceiver,
    uploader: ArtifactUploader,
    webhook: WebhookDelivery,
    poll_timeout: Duration,
}

impl UploadWorker {
    /// Create a worker with the default 1-second poll timeout.
    pub fn new(
        queue: DeliveryQueueReceiver,
        uploader: ArtifactUploader,
        webhook: WebhookDelivery,
    ) -> Self {
        Self {
            queue,
            uploader,
            webhook,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Drain the queue until `cancel` is triggered or the queue closes.
    ///
    /// Cancellation is only observed when a poll times out, so an envelope
    /// that has been dequeued is always finished.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Upload worker started",
        );

        loop {
            match self.queue.pop(self.poll_timeout).await {
                Ok(Some(envelope)) => {
                    let id = envelope.id().to_string();
                    match self.process(envelope).await {
                        Ok(status) => tracing::debug!(job_id = %id, status, "Envelope processed"),
                        Err(e) => {
                            tracing::error!(job_id = %id, error = %e, "Webhook delivery failed")
                        }
                    }
                }
                Ok(None) => {
                    if cancel.is_cancelled() {
                        tracing::info!("Upload worker shutting down");
                        break;
                    }
                }
                Err(QueueError::Closed) => {
                    tracing::info!("Delivery queue closed, upload worker stopping");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Delivery queue failed, upload worker stopping");
                    break;
                }
            }
        }
    }

    /// Upload, strip and deliver one envelope.
    ///
    /// Returns the final webhook status code. An upload failure turns the
    /// envelope into a `failed` one and delivery still happens; a delivery
    /// failure is returned to the caller.
    pub async fn process(&self, mut envelope: ResultEnvelope) -> Result<u16, WebhookError> {
        let span = tracing::info_span!(
            "deliver",
            job_id = %envelope.id(),
            kind = envelope.job_kind().as_str(),
        );

        async move {
            let pending = envelope.pending_uploads();
            if pending > 0 {
                let started = Instant::now();
                match self.uploader.upload(&mut envelope).await {
                    Ok(()) => tracing::info!(
                        artifacts = pending,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Artifacts uploaded",
                    ),
                    Err(e) => {
                        tracing::error!(artifacts = pending, error = %e, "Artifact upload failed");
                        envelope.mark_failed(e.to_string());
                    }
                }
            }

            envelope.strip_internal();
            let payload = envelope.to_delivery_payload();

            self.webhook.deliver(&payload.webhook_url, &payload).await
        }
        .instrument(span)
        .await
    }
}
