//! Receipt wire and queue types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vendor::{DeliveryOutcome, DeliveryReceipt};

/// Errors reported to whoever posted the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    /// Missing or malformed fields.
    #[error("invalid receipt payload: {0}")]
    InvalidPayload(String),

    /// The ingestion buffer is full; the sender should retry later.
    #[error("receipt queue is full")]
    QueueFull,

    /// The router has stopped.
    #[error("receipt queue is closed")]
    Closed,
}

/// Delivery receipt as posted by a vendor.
///
/// Every field is optional on the wire so that validation can report what
/// is missing instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// RFC 3339 time the vendor reached the outcome.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Opaque vendor data, carried along for logging only.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl From<DeliveryReceipt> for ReceiptPayload {
    fn from(receipt: DeliveryReceipt) -> Self {
        Self {
            message_id: Some(receipt.message_id),
            status: Some(receipt.status.as_str().to_string()),
            timestamp: Some(receipt.timestamp.to_rfc3339()),
            batch_id: receipt.batch_id,
            error: receipt.error,
            metadata: None,
        }
    }
}

impl ReceiptPayload {
    /// Validate the payload into a queued envelope.
    pub fn validate(self) -> Result<ReceiptEnvelope, ReceiptError> {
        let message_id = self
            .message_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReceiptError::InvalidPayload("message_id is required".to_string()))?;

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ReceiptError::InvalidPayload(
                    "status is required".to_string(),
                ))
            }
            Some(s) if s.eq_ignore_ascii_case("delivered") => DeliveryOutcome::Delivered,
            Some(s) if s.eq_ignore_ascii_case("failed") => DeliveryOutcome::Failed,
            Some(other) => {
                return Err(ReceiptError::InvalidPayload(format!(
                    "unknown status '{}'",
                    other
                )))
            }
        };

        let timestamp = match self.timestamp.as_deref() {
            None => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| {
                        ReceiptError::InvalidPayload(format!("invalid timestamp '{}'", raw))
                    })?,
            ),
        };

        let batch_id = self
            .batch_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ReceiptEnvelope {
            message_id,
            status,
            batch_id,
            error: self.error,
            timestamp,
            metadata: self.metadata.filter(|m| !m.is_null()),
            received_at: Utc::now(),
        })
    }
}

/// A validated receipt waiting in the ingestion queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptEnvelope {
    pub message_id: String,
    pub status: DeliveryOutcome,
    pub batch_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

/// Acknowledgement returned to the poster once the receipt is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptAck {
    pub received: bool,
    pub message_id: String,
}
