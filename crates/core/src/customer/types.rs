//! Customer and segment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message recipient owned by a CRM user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub total_spend: f64,
    pub visit_count: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Contact address the vendor should deliver to.
    pub fn recipient(&self) -> &str {
        if self.email.is_empty() {
            self.phone.as_deref().unwrap_or("")
        } else {
            &self.email
        }
    }
}

/// Customer attribute a segment condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerField {
    TotalSpend,
    VisitCount,
    /// Days since last activity (or since creation if never active).
    DaysInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Comparison {
    pub fn sql_operator(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Eq => "=",
        }
    }
}

/// A single `field op value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCondition {
    pub field: CustomerField,
    pub op: Comparison,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCombinator {
    #[default]
    All,
    Any,
}

/// Filter predicate over customers.
///
/// An empty condition list matches every customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentRules {
    #[serde(default)]
    pub combinator: RuleCombinator,
    #[serde(default)]
    pub conditions: Vec<SegmentCondition>,
}

/// A named audience filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub rules: SegmentRules,
    pub created_at: DateTime<Utc>,
}
