use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::aggregator::{AddOutcomeResult, AggregatorError, BatchAggregator};
use crate::metrics;

use super::{ReceiptEnvelope, ReceiptIngestor};

/// Background task that drains the receipt queue into the aggregator.
pub struct ReceiptRouter {
    rx: mpsc::Receiver<ReceiptEnvelope>,
    aggregator: Arc<BatchAggregator>,
}

impl ReceiptRouter {
    pub fn new(rx: mpsc::Receiver<ReceiptEnvelope>, aggregator: Arc<BatchAggregator>) -> Self {
        Self { rx, aggregator }
    }

    /// Run until every `ReceiptIngestor` is dropped.
    ///
    /// Spawn with `tokio::spawn(router.run())`.
    pub async fn run(mut self) {
        info!("Receipt router started");
        while let Some(envelope) = self.rx.recv().await {
            self.route(envelope);
        }
        info!("Receipt router stopped");
    }

    /// Run until the channel closes or `shutdown` fires, then route whatever
    /// is already queued.
    pub async fn run_until_shutdown(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Receipt router started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    while let Ok(envelope) = self.rx.try_recv() {
                        self.route(envelope);
                    }
                    break;
                }
                next = self.rx.recv() => match next {
                    Some(envelope) => self.route(envelope),
                    None => break,
                },
            }
        }
        info!("Receipt router stopped");
    }

    fn route(&self, envelope: ReceiptEnvelope) {
        let batch_id = match envelope
            .batch_id
            .clone()
            .or_else(|| self.aggregator.batch_for_message(&envelope.message_id))
        {
            Some(id) => id,
            None => {
                metrics::RECEIPTS_ROUTED
                    .with_label_values(&["unknown_batch"])
                    .inc();
                warn!(
                    "Receipt for unknown message {} dropped (no batch)",
                    envelope.message_id
                );
                return;
            }
        };

        match self.aggregator.add_outcome(
            &batch_id,
            &envelope.message_id,
            envelope.status,
            envelope.error,
        ) {
            Ok(AddOutcomeResult::Queued) => {
                metrics::RECEIPTS_ROUTED.with_label_values(&["queued"]).inc();
                if let Some(metadata) = &envelope.metadata {
                    debug!(
                        "Receipt for {} queued with vendor metadata {}",
                        envelope.message_id, metadata
                    );
                }
            }
            Ok(AddOutcomeResult::Duplicate) => {
                metrics::RECEIPTS_ROUTED
                    .with_label_values(&["duplicate"])
                    .inc();
                debug!("Duplicate receipt for {} ignored", envelope.message_id);
            }
            Err(AggregatorError::NotFound(_)) => {
                metrics::RECEIPTS_ROUTED
                    .with_label_values(&["unknown_batch"])
                    .inc();
                warn!(
                    "Receipt for {} references unknown batch {}",
                    envelope.message_id, batch_id
                );
            }
            Err(AggregatorError::UnknownMessage { .. }) => {
                metrics::RECEIPTS_ROUTED
                    .with_label_values(&["unknown_message"])
                    .inc();
                warn!(
                    "Receipt for {} dropped: message not sent in batch {}",
                    envelope.message_id, batch_id
                );
            }
            Err(e) => {
                metrics::RECEIPTS_ROUTED.with_label_values(&["error"]).inc();
                warn!("Failed to route receipt for {}: {}", envelope.message_id, e);
            }
        }
    }
}

/// Create the receipt ingestion pipeline.
///
/// Returns:
/// - `ReceiptIngestor` - for posting receipts (clone to share)
/// - `ReceiptRouter` - spawn as a background task
pub fn create_receipt_pipeline(
    aggregator: Arc<BatchAggregator>,
    buffer_size: usize,
) -> (ReceiptIngestor, ReceiptRouter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ReceiptIngestor::new(tx), ReceiptRouter::new(rx, aggregator))
}
