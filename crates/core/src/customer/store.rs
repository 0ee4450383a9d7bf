//! Customer storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Customer, Segment, SegmentRules};

/// Error type for customer operations.
#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub total_spend: f64,
    pub visit_count: u32,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateSegmentRequest {
    pub owner_id: String,
    pub name: String,
    pub rules: SegmentRules,
}

/// Trait for customer storage backends.
pub trait CustomerStore: Send + Sync {
    fn create_customer(&self, request: CreateCustomerRequest) -> Result<Customer, CustomerError>;

    fn create_segment(&self, request: CreateSegmentRequest) -> Result<Segment, CustomerError>;

    fn get_segment(&self, id: &str) -> Result<Option<Segment>, CustomerError>;

    /// One page of the owner's customers matching `rules`, ordered by id.
    ///
    /// `after` is the id of the last customer of the previous page.
    fn find_by_owner_and_segment(
        &self,
        owner_id: &str,
        rules: Option<&SegmentRules>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Customer>, CustomerError>;
}
