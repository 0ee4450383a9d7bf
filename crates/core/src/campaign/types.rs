//! Campaign domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign.
///
/// Transitions only move forward: draft -> scheduled -> active -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Active => "active",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle ordering.
    ///
    /// Draft may jump straight to active ("deliver now").
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Active)
                | (Scheduled, Active)
                | (Active, Completed)
                | (Active, Failed)
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "active" => Ok(CampaignStatus::Active),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(format!("unknown campaign status: {}", other)),
        }
    }
}

/// Aggregate delivery statistics for a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounters {
    /// Recipients a message was dispatched to.
    pub sent: u64,
    /// Messages the vendor confirmed as delivered.
    pub delivered: u64,
    /// Messages that failed, at send time or by receipt.
    pub failed: u64,
}

impl DeliveryCounters {
    /// Whether every dispatched message has a terminal outcome.
    pub fn is_settled(&self) -> bool {
        self.sent == self.delivered + self.failed
    }
}

/// Increment applied to campaign counters in a single storage update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl CounterDelta {
    pub fn sent(n: u64) -> Self {
        Self {
            sent: n,
            ..Default::default()
        }
    }

    pub fn delivered(n: u64) -> Self {
        Self {
            delivered: n,
            ..Default::default()
        }
    }

    pub fn failed(n: u64) -> Self {
        Self {
            failed: n,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.sent == 0 && self.delivered == 0 && self.failed == 0
    }
}

/// A unit of outbound messaging work targeting a customer audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// Message body with `{{name}}` / `{{email}}` placeholders.
    pub message_template: String,
    pub owner_id: String,
    /// Segment selecting the audience; `None` targets all of the owner's customers.
    pub segment_id: Option<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Number of delivery attempts that had rejected sends.
    pub failed_count: u32,
    pub counters: DeliveryCounters,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Scheduled));
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Active));
        assert!(CampaignStatus::Scheduled.can_transition_to(CampaignStatus::Active));
        assert!(CampaignStatus::Active.can_transition_to(CampaignStatus::Completed));
        assert!(CampaignStatus::Active.can_transition_to(CampaignStatus::Failed));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!CampaignStatus::Scheduled.can_transition_to(CampaignStatus::Draft));
        assert!(!CampaignStatus::Active.can_transition_to(CampaignStatus::Scheduled));
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Active));
        assert!(!CampaignStatus::Failed.can_transition_to(CampaignStatus::Completed));
        assert!(!CampaignStatus::Active.can_transition_to(CampaignStatus::Active));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Active,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("paused".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_counters_settled() {
        let counters = DeliveryCounters {
            sent: 10,
            delivered: 7,
            failed: 3,
        };
        assert!(counters.is_settled());

        let counters = DeliveryCounters {
            sent: 10,
            delivered: 7,
            failed: 2,
        };
        assert!(!counters.is_settled());
    }
}
