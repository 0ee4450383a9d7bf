//! Communication log storage trait.

use thiserror::Error;

use super::{LogEntry, LogStatus};

#[derive(Debug, Error)]
pub enum CommLogError {
    /// Only pending entries can be finalized.
    #[error("Invalid status update to {0}: only terminal statuses can be applied")]
    InvalidStatus(LogStatus),

    /// Database error. Treated as transient by callers.
    #[error("Database error: {0}")]
    Database(String),
}

/// Trait for communication log backends.
pub trait CommLogStore: Send + Sync {
    /// Insert provisional entries in one write.
    fn insert_many(&self, entries: &[LogEntry]) -> Result<(), CommLogError>;

    /// Flip the given pending entries of `campaign_id` to a terminal status.
    ///
    /// Entries that are already terminal, or belong to another campaign, are
    /// left untouched, which makes a replayed update a no-op. Returns the
    /// number of entries changed.
    fn bulk_update_status(
        &self,
        campaign_id: &str,
        ids: &[String],
        status: LogStatus,
        error: Option<&str>,
    ) -> Result<usize, CommLogError>;

    /// All entries of a campaign, oldest first.
    fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<LogEntry>, CommLogError>;
}
