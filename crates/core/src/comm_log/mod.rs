//! Communication log: the durable per-message record of delivery attempts.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteCommLogStore;
pub use store::{CommLogError, CommLogStore};
pub use types::{LogEntry, LogStatus};
