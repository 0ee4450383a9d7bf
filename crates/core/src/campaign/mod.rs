//! Campaigns: lifecycle status, delivery counters and their storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteCampaignStore;
pub use store::{CampaignError, CampaignStore, CreateCampaignRequest};
pub use types::{Campaign, CampaignStatus, CounterDelta, DeliveryCounters};
