//! Types for the batch aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::campaign::CampaignError;
use crate::comm_log::CommLogError;

/// Errors from aggregator operations.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// No batch with this ID is being tracked.
    #[error("batch not found: {0}")]
    NotFound(String),

    /// Persisting a flush failed; the updates stay queued for retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// The message was never registered in this batch.
    #[error("message {message_id} is not part of batch {batch_id}")]
    UnknownMessage {
        batch_id: String,
        message_id: String,
    },

    /// The aggregator has been shut down.
    #[error("aggregator is shut down")]
    Closed,
}

impl From<CommLogError> for AggregatorError {
    fn from(e: CommLogError) -> Self {
        AggregatorError::Storage(e.to_string())
    }
}

impl From<CampaignError> for AggregatorError {
    fn from(e: CampaignError) -> Self {
        AggregatorError::Storage(e.to_string())
    }
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Pending outcomes reached the size threshold.
    Threshold,
    /// An outcome arrived after the last flush went stale.
    Staleness,
    /// Periodic batch timer.
    Timer,
    /// Explicit `flush()` call.
    Manual,
    /// Settlement, idle eviction or shutdown.
    Final,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Staleness => "staleness",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Final => "final",
        }
    }
}

/// Result of recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcomeResult {
    /// Outcome buffered for the next flush.
    Queued,
    /// An outcome for this message was already recorded; ignored.
    Duplicate,
}

/// Summary of one `flush` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Chunks applied.
    pub chunks: usize,
    /// Outcomes contained in the applied chunks.
    pub outcomes: usize,
    /// Log entries actually moved to delivered.
    pub delivered: u64,
    /// Log entries actually moved to failed.
    pub failed: u64,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }
}

/// Snapshot of a batch for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub batch_id: String,
    pub campaign_id: String,
    pub sealed: bool,
    /// Messages sent and still awaiting a receipt.
    pub outstanding: usize,
    /// Outcomes buffered but not yet swapped into a chunk.
    pub pending: usize,
    /// Chunks waiting to be persisted.
    pub queued_chunks: usize,
    pub threshold_flushes: u64,
    pub staleness_flushes: u64,
    pub timer_flushes: u64,
    pub manual_flushes: u64,
    pub final_flushes: u64,
    pub failed_flushes: u64,
    /// Outcomes persisted across all flushes.
    pub outcomes_applied: u64,
    pub duplicates: u64,
    pub created_at: DateTime<Utc>,
}

impl BatchStats {
    pub fn total_flushes(&self) -> u64 {
        self.threshold_flushes
            + self.staleness_flushes
            + self.timer_flushes
            + self.manual_flushes
            + self.final_flushes
    }
}
