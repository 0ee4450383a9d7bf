//! Testing utilities and mock implementations.
//!
//! Mocks for the vendor and storage seams, so delivery can be exercised
//! end to end without a real vendor or a failing disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::testing::{FlakyCommLogStore, MockVendor};
//!
//! let vendor = MockVendor::new();
//! vendor.reject_next(3);
//!
//! let comm_log = FlakyCommLogStore::new(Arc::new(SqliteCommLogStore::in_memory()?));
//! comm_log.fail_next_updates(1);
//! ```

mod flaky_comm_log;
mod mock_vendor;

pub use flaky_comm_log::FlakyCommLogStore;
pub use mock_vendor::MockVendor;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::campaign::CreateCampaignRequest;
    use crate::customer::CreateCustomerRequest;

    /// A draft campaign request for `owner_id` targeting all its customers.
    pub fn campaign_request(owner_id: &str, name: &str) -> CreateCampaignRequest {
        CreateCampaignRequest {
            name: name.to_string(),
            message_template: "Hi {{name}}, we miss you!".to_string(),
            owner_id: owner_id.to_string(),
            segment_id: None,
        }
    }

    /// The `index`-th synthetic customer of `owner_id`.
    pub fn customer_request(owner_id: &str, index: usize) -> CreateCustomerRequest {
        CreateCustomerRequest {
            owner_id: owner_id.to_string(),
            name: format!("Customer {}", index),
            email: format!("customer{}@example.com", index),
            phone: None,
            total_spend: (index % 50) as f64 * 20.0,
            visit_count: (index % 12) as u32,
            last_active_at: None,
        }
    }
}
