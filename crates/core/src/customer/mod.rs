//! Customers and segments, consumed read-only to resolve campaign audiences.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteCustomerStore;
pub use store::{CreateCustomerRequest, CreateSegmentRequest, CustomerError, CustomerStore};
pub use types::{
    Comparison, Customer, CustomerField, RuleCombinator, Segment, SegmentCondition, SegmentRules,
};
