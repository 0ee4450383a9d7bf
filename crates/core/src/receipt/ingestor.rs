use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::metrics;

use super::{ReceiptAck, ReceiptEnvelope, ReceiptError, ReceiptPayload};

/// Entry point for delivery receipts.
///
/// Cheaply cloneable. `receive` validates and enqueues without waiting on
/// storage; the `ReceiptRouter` on the other end of the channel hands
/// receipts to the aggregator.
#[derive(Clone)]
pub struct ReceiptIngestor {
    tx: mpsc::Sender<ReceiptEnvelope>,
}

impl ReceiptIngestor {
    pub fn new(tx: mpsc::Sender<ReceiptEnvelope>) -> Self {
        Self { tx }
    }

    /// Validate and enqueue a receipt.
    pub fn receive(&self, payload: ReceiptPayload) -> Result<ReceiptAck, ReceiptError> {
        let envelope = match payload.validate() {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::RECEIPTS_RECEIVED
                    .with_label_values(&["invalid"])
                    .inc();
                debug!("Rejected receipt: {}", e);
                return Err(e);
            }
        };

        let message_id = envelope.message_id.clone();
        match self.tx.try_send(envelope) {
            Ok(()) => {
                metrics::RECEIPTS_RECEIVED
                    .with_label_values(&["accepted"])
                    .inc();
                Ok(ReceiptAck {
                    received: true,
                    message_id,
                })
            }
            Err(TrySendError::Full(_)) => {
                metrics::RECEIPTS_RECEIVED
                    .with_label_values(&["queue_full"])
                    .inc();
                warn!("Receipt queue full, dropping receipt for {}", message_id);
                Err(ReceiptError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                metrics::RECEIPTS_RECEIVED
                    .with_label_values(&["closed"])
                    .inc();
                warn!("Receipt queue closed, dropping receipt for {}", message_id);
                Err(ReceiptError::Closed)
            }
        }
    }

    /// Receipts currently buffered.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendor::DeliveryOutcome;

    fn payload(id: &str) -> ReceiptPayload {
        ReceiptPayload {
            message_id: Some(id.to_string()),
            status: Some("delivered".to_string()),
            batch_id: Some("b1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_receive_enqueues() {
        let (tx, mut rx) = mpsc::channel(10);
        let ingestor = ReceiptIngestor::new(tx);

        let ack = ingestor.receive(payload("m1")).unwrap();
        assert!(ack.received);
        assert_eq!(ack.message_id, "m1");
        assert_eq!(ingestor.queued(), 1);

        let envelope = rx.try_recv().expect("Should receive envelope");
        assert_eq!(envelope.message_id, "m1");
        assert_eq!(envelope.status, DeliveryOutcome::Delivered);
    }

    #[test]
    fn test_invalid_payload_not_enqueued() {
        let (tx, mut rx) = mpsc::channel(10);
        let ingestor = ReceiptIngestor::new(tx);

        let result = ingestor.receive(ReceiptPayload::default());
        assert!(matches!(result, Err(ReceiptError::InvalidPayload(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let ingestor = ReceiptIngestor::new(tx);

        assert!(ingestor.receive(payload("m1")).is_ok());
        assert_eq!(
            ingestor.receive(payload("m2")).unwrap_err(),
            ReceiptError::QueueFull
        );
    }

    #[test]
    fn test_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        let ingestor = ReceiptIngestor::new(tx);
        drop(rx);

        assert_eq!(
            ingestor.receive(payload("m1")).unwrap_err(),
            ReceiptError::Closed
        );
    }
}
