//! Bounded hand-off between orchestration tasks and the upload worker.
//!
//! Any number of [`DeliveryQueueSender`]s may push; exactly one
//! [`DeliveryQueueReceiver`] pops. The receiver is not `Clone`, so a second
//! consumer cannot be created.

use std::time::Duration;

use genrelay_core::ResultEnvelope;
use tokio::sync::mpsc;

/// Default number of envelopes buffered before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Largest capacity a queue is created with.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Errors raised by the delivery queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The receiver was dropped. The rejected envelope is handed back.
    #[error("delivery queue consumer has gone away (envelope {})", .0.id())]
    ConsumerGone(Box<ResultEnvelope>),

    /// Every sender was dropped and the queue is drained.
    #[error("delivery queue is closed")]
    Closed,
}

/// Constructor namespace for the queue halves.
pub struct DeliveryQueue;

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` envelopes, clamped to
    /// `1..=MAX_QUEUE_CAPACITY`.
    pub fn bounded(capacity: usize) -> (DeliveryQueueSender, DeliveryQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        (DeliveryQueueSender { tx }, DeliveryQueueReceiver { rx })
    }
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeliveryQueueSender {
    tx: mpsc::Sender<ResultEnvelope>,
}

impl DeliveryQueueSender {
    /// Enqueue `envelope`, waiting while the queue is full.
    pub async fn push(&self, envelope: ResultEnvelope) -> Result<(), QueueError> {
        self.tx.send(envelope).await.map_err(|mpsc::error::SendError(envelope)| {
            QueueError::ConsumerGone(Box::new(envelope))
        })
    }

    /// Capacity the queue was created with.
    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half. Deliberately not `Clone`.
#[derive(Debug)]
pub struct DeliveryQueueReceiver {
    rx: mpsc::Receiver<ResultEnvelope>,
}

impl DeliveryQueueReceiver {
    /// Wait up to `timeout` for the next envelope.
    ///
    /// `Ok(None)` means the wait timed out.
    pub async fn pop(&mut self, timeout: Duration) -> Result<Option<ResultEnvelope>, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(QueueError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Envelopes currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genrelay_core::envelope::ImageResultEnvelope;
    use genrelay_core::job::JobRouting;

    use super::*;

    fn envelope(id: &str) -> ResultEnvelope {
        ImageResultEnvelope::new(&JobRouting {
            id: id.into(),
            webhook_url: "http://caller/hook".into(),
            upload_prefix: format!("results/{id}"),
        })
        .into()
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn pops_in_push_order() {
        let (tx, mut rx) = DeliveryQueue::bounded(8);
        for id in ["a", "b", "c"] {
            tx.push(envelope(id)).await.unwrap();
        }
        assert_eq!(rx.len(), 3);

        for id in ["a", "b", "c"] {
            let popped = rx.pop(SHORT).await.unwrap().unwrap();
            assert_eq!(popped.id(), id);
        }
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_times_out_with_none() {
        let (_tx, mut rx) = DeliveryQueue::bounded(1);
        let started = tokio::time::Instant::now();

        let popped = rx.pop(Duration::from_secs(1)).await.unwrap();

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(DeliveryQueue::bounded(0).0.max_capacity(), 1);
        assert_eq!(DeliveryQueue::bounded(16).0.max_capacity(), 16);
        assert_eq!(
            DeliveryQueue::bounded(usize::MAX).0.max_capacity(),
            MAX_QUEUE_CAPACITY
        );
    }

    #[tokio::test]
    async fn push_waits_while_full() {
        let (tx, mut rx) = DeliveryQueue::bounded(1);
        tx.push(envelope("first")).await.unwrap();

        let blocked = tokio::time::timeout(SHORT, tx.push(envelope("second"))).await;
        assert!(blocked.is_err(), "push should wait for free capacity");

        let producer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.push(envelope("second")).await })
        };
        assert_eq!(rx.pop(SHORT).await.unwrap().unwrap().id(), "first");
        producer.await.unwrap().unwrap();
        assert_eq!(rx.pop(SHORT).await.unwrap().unwrap().id(), "second");
    }

    #[tokio::test]
    async fn push_returns_envelope_when_consumer_gone() {
        let (tx, rx) = DeliveryQueue::bounded(4);
        drop(rx);

        let err = tx.push(envelope("orphan")).await.unwrap_err();

        let returned = assert_matches!(err, QueueError::ConsumerGone(env) => env);
        assert_eq!(returned.id(), "orphan");
    }

    #[tokio::test]
    async fn drained_queue_without_producers_is_closed() {
        let (tx, mut rx) = DeliveryQueue::bounded(4);
        tx.push(envelope("last")).await.unwrap();
        drop(tx);

        assert_eq!(rx.pop(SHORT).await.unwrap().unwrap().id(), "last");
        assert_matches!(rx.pop(SHORT).await, Err(QueueError::Closed));
    }
}
