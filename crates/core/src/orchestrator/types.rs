//! Types for the delivery orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during a delivery run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Campaign not found.
    #[error("campaign not found: {0}")]
    NotFound(String),

    /// Campaign status does not allow the operation.
    #[error("invalid campaign state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A run for this campaign is already in progress.
    #[error("delivery already running for campaign {0}")]
    AlreadyRunning(String),

    /// Campaign store error.
    #[error("campaign store error: {0}")]
    Campaign(#[from] crate::campaign::CampaignError),

    /// Customer store error.
    #[error("customer store error: {0}")]
    Customer(#[from] crate::customer::CustomerError),

    /// Communication log error.
    #[error("communication log error: {0}")]
    CommLog(#[from] crate::comm_log::CommLogError),

    /// Aggregator error.
    #[error("aggregator error: {0}")]
    Aggregator(#[from] crate::aggregator::AggregatorError),
}

/// Result of one pass over a set of recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Recipients per batch, in dispatch order.
    pub batch_sizes: Vec<usize>,
    /// Sends the vendor acknowledged.
    pub accepted: usize,
    /// Sends rejected or timed out.
    pub rejected: usize,
}

/// Summary of a delivery run's send phase.
///
/// Receipts for accepted messages keep arriving after this is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub campaign_id: String,
    pub batch_id: String,
    /// Recipients dispatched in the first pass.
    pub audience: usize,
    pub passes: Vec<PassReport>,
    /// Recipients whose send was still rejected when the run ended.
    pub failed_sends: usize,
    /// The retry budget ran out and the campaign was marked failed.
    pub exhausted: bool,
    /// The run was cancelled before it finished.
    pub cancelled: bool,
}

impl DeliveryReport {
    /// First-pass batch sizes.
    pub fn batch_sizes(&self) -> &[usize] {
        self.passes
            .first()
            .map(|p| p.batch_sizes.as_slice())
            .unwrap_or(&[])
    }

    /// Sends acknowledged across all passes.
    pub fn accepted(&self) -> usize {
        self.passes.iter().map(|p| p.accepted).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_helpers() {
        let report = DeliveryReport {
            campaign_id: "c1".to_string(),
            batch_id: "b1".to_string(),
            audience: 250,
            passes: vec![
                PassReport {
                    attempt: 1,
                    batch_sizes: vec![100, 100, 50],
                    accepted: 240,
                    rejected: 10,
                },
                PassReport {
                    attempt: 2,
                    batch_sizes: vec![10],
                    accepted: 10,
                    rejected: 0,
                },
            ],
            ..Default::default()
        };

        assert_eq!(report.batch_sizes(), &[100, 100, 50]);
        assert_eq!(report.accepted(), 250);
    }

    #[test]
    fn test_empty_report() {
        let report = DeliveryReport::default();
        assert!(report.batch_sizes().is_empty());
        assert_eq!(report.accepted(), 0);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::InvalidState {
            expected: "active".to_string(),
            actual: "draft".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid campaign state: expected active, got draft"
        );
    }
}
