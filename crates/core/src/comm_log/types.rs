//! Communication log entry types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a single message.
///
/// `Pending` means the vendor accepted (or is about to receive) the message;
/// only a receipt or a send failure moves it to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Delivered,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Delivered => "delivered",
            LogStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LogStatus::Pending)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "delivered" => Ok(LogStatus::Delivered),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status: {}", other)),
        }
    }
}

/// One message sent to one customer in one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Vendor message id.
    pub id: String,
    pub campaign_id: String,
    pub customer_id: String,
    pub recipient: String,
    /// 1-based delivery attempt this message belongs to.
    pub attempt: u32,
    pub status: LogStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogEntry {
    /// Provisional entry written before the vendor is called.
    pub fn pending(
        id: impl Into<String>,
        campaign_id: impl Into<String>,
        customer_id: impl Into<String>,
        recipient: impl Into<String>,
        attempt: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            campaign_id: campaign_id.into(),
            customer_id: customer_id.into(),
            recipient: recipient.into(),
            attempt,
            status: LogStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
