//! Mock vendor for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::vendor::{
    CallbackDispatcher, DeliveryOutcome, DeliveryReceipt, SendAck, SendRequest, VendorClient,
    VendorError,
};

/// Mock implementation of the VendorClient trait.
///
/// Provides controllable behavior for testing:
/// - Records every send attempt
/// - Rejects all sends, or the next N
/// - Adds acknowledgement latency (for timeout tests)
/// - Optionally posts receipts for accepted sends to a dispatcher
///
/// # Example
///
/// ```rust,ignore
/// let vendor = MockVendor::with_receipts(Arc::new(IngestCallback::new(ingestor)));
/// vendor.fail_recipient("bounce@example.com").await;
///
/// // ... run a delivery ...
///
/// assert_eq!(vendor.sent_requests().await.len(), 10);
/// ```
pub struct MockVendor {
    /// Every send attempt, accepted or not.
    sent: Arc<RwLock<Vec<SendRequest>>>,
    reject_all: AtomicBool,
    reject_next: AtomicUsize,
    latency: std::sync::Mutex<Option<Duration>>,
    /// Where receipts go; `None` means no receipts are produced.
    dispatcher: Option<Arc<dyn CallbackDispatcher>>,
    receipt_delay: RwLock<Duration>,
    /// Recipients whose receipt reports `failed`.
    failing_recipients: RwLock<HashSet<String>>,
    accepted: AtomicUsize,
}

impl Default for MockVendor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVendor {
    /// A vendor that accepts everything and never sends receipts.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(RwLock::new(Vec::new())),
            reject_all: AtomicBool::new(false),
            reject_next: AtomicUsize::new(0),
            latency: std::sync::Mutex::new(None),
            dispatcher: None,
            receipt_delay: RwLock::new(Duration::ZERO),
            failing_recipients: RwLock::new(HashSet::new()),
            accepted: AtomicUsize::new(0),
        }
    }

    /// A vendor that posts a receipt for every accepted send.
    pub fn with_receipts(dispatcher: Arc<dyn CallbackDispatcher>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            ..Self::new()
        }
    }

    /// Reject every send while `reject` is true.
    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Reject the next `n` sends.
    pub fn reject_next(&self, n: usize) {
        self.reject_next.store(n, Ordering::SeqCst);
    }

    /// Delay every acknowledgement by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Delay between acceptance and the receipt.
    pub async fn set_receipt_delay(&self, delay: Duration) {
        *self.receipt_delay.write().await = delay;
    }

    /// Report `failed` for sends to `recipient`.
    pub async fn fail_recipient(&self, recipient: &str) {
        self.failing_recipients
            .write()
            .await
            .insert(recipient.to_string());
    }

    /// Get all recorded send attempts.
    pub async fn sent_requests(&self) -> Vec<SendRequest> {
        self.sent.read().await.clone()
    }

    /// Sends acknowledged so far.
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn should_reject(&self) -> bool {
        if self.reject_all.load(Ordering::SeqCst) {
            return true;
        }
        self.reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl VendorClient for MockVendor {
    async fn send(&self, request: SendRequest) -> Result<SendAck, VendorError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let message_id = request.message_id.clone();
        self.sent.write().await.push(request.clone());

        if self.should_reject() {
            return Err(VendorError::Rejected("mock rejection".to_string()));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);

        if let Some(dispatcher) = &self.dispatcher {
            let status = if self
                .failing_recipients
                .read()
                .await
                .contains(&request.recipient)
            {
                DeliveryOutcome::Failed
            } else {
                DeliveryOutcome::Delivered
            };
            let delay = *self.receipt_delay.read().await;
            let dispatcher = Arc::clone(dispatcher);

            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let receipt = DeliveryReceipt {
                    message_id: request.message_id,
                    status,
                    timestamp: Utc::now(),
                    batch_id: Some(request.batch_id),
                    error: match status {
                        DeliveryOutcome::Failed => Some("mock delivery failure".to_string()),
                        DeliveryOutcome::Delivered => None,
                    },
                };
                let _ = dispatcher.dispatch(&request.callback_url, receipt).await;
            });
        }

        Ok(SendAck {
            success: true,
            message_id,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
