//! Campaign storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Campaign, CampaignStatus, CounterDelta};

/// Error type for campaign operations.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Campaign not found.
    #[error("Campaign not found: {0}")]
    NotFound(String),

    /// The campaign is not in the status the transition expects.
    #[error("Cannot move campaign {campaign_id} from {from} to {to}: current status is {current}")]
    InvalidTransition {
        campaign_id: String,
        from: CampaignStatus,
        to: CampaignStatus,
        current: CampaignStatus,
    },

    /// Database error. Treated as transient by callers.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new campaign (always starts in draft).
#[derive(Debug, Clone)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub message_template: String,
    pub owner_id: String,
    pub segment_id: Option<String>,
}

/// Trait for campaign storage backends.
///
/// Status changes are conditional on the current status so that concurrent
/// writers cannot both claim the same campaign.
pub trait CampaignStore: Send + Sync {
    /// Create a new draft campaign.
    fn create(&self, request: CreateCampaignRequest) -> Result<Campaign, CampaignError>;

    /// Get a campaign by ID.
    fn get(&self, id: &str) -> Result<Option<Campaign>, CampaignError>;

    /// Campaigns in `scheduled` status whose dispatch time is at or before `now`.
    fn find_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, CampaignError>;

    /// Atomically move a campaign from `from` to `to`.
    ///
    /// Returns `Ok(false)` if the campaign exists but is no longer in `from`
    /// (someone else won the race), `NotFound` if it does not exist and
    /// `InvalidTransition` if `from -> to` is not a lifecycle edge.
    fn transition(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, CampaignError>;

    /// Move a draft campaign to `scheduled` with the given dispatch time.
    fn schedule(&self, id: &str, at: DateTime<Utc>) -> Result<Campaign, CampaignError>;

    /// Add `delta` to the campaign counters in a single storage update.
    fn increment_counters(&self, id: &str, delta: CounterDelta) -> Result<(), CampaignError>;

    /// Increment the retry counter, returning the new value.
    fn increment_failed_count(&self, id: &str) -> Result<u32, CampaignError>;

    /// Stamp the time of the last completed run.
    fn set_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<(), CampaignError>;
}
