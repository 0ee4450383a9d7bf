use async_trait::async_trait;

use crate::vendor::{CallbackDispatcher, DeliveryReceipt, VendorError};

use super::{ReceiptError, ReceiptIngestor};

/// Delivers simulator receipts straight into ingestion, skipping HTTP.
///
/// The callback URL is ignored.
#[derive(Clone)]
pub struct IngestCallback {
    ingestor: ReceiptIngestor,
}

impl IngestCallback {
    pub fn new(ingestor: ReceiptIngestor) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl CallbackDispatcher for IngestCallback {
    async fn dispatch(
        &self,
        _callback_url: &str,
        receipt: DeliveryReceipt,
    ) -> Result<(), VendorError> {
        self.ingestor
            .receive(receipt.into())
            .map(|_| ())
            .map_err(|e| match e {
                ReceiptError::InvalidPayload(msg) => VendorError::Rejected(msg),
                other => VendorError::Transport(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::mpsc;

    use super::*;
    use crate::vendor::DeliveryOutcome;

    #[tokio::test]
    async fn test_dispatch_enqueues_receipt() {
        let (tx, mut rx) = mpsc::channel(4);
        let callback = IngestCallback::new(ReceiptIngestor::new(tx));

        callback
            .dispatch(
                "http://ignored",
                DeliveryReceipt {
                    message_id: "m1".to_string(),
                    status: DeliveryOutcome::Failed,
                    timestamp: Utc::now(),
                    batch_id: Some("b1".to_string()),
                    error: Some("mailbox full".to_string()),
                },
            )
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.message_id, "m1");
        assert_eq!(envelope.status, DeliveryOutcome::Failed);
        assert_eq!(envelope.batch_id.as_deref(), Some("b1"));
        assert_eq!(envelope.error.as_deref(), Some("mailbox full"));
    }

    #[tokio::test]
    async fn test_dispatch_reports_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let callback = IngestCallback::new(ReceiptIngestor::new(tx));

        let result = callback
            .dispatch(
                "http://ignored",
                DeliveryReceipt {
                    message_id: "m1".to_string(),
                    status: DeliveryOutcome::Delivered,
                    timestamp: Utc::now(),
                    batch_id: None,
                    error: None,
                },
            )
            .await;
        assert!(matches!(result, Err(VendorError::Transport(_))));
    }
}
