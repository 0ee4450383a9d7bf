//! Delivery orchestrator.
//!
//! Turns an active campaign into vendor sends:
//! - **Audience**: paged from the customer store, one page per batch
//! - **Sends**: concurrent within a batch, sequential across batches
//! - **Retries**: rejected sends only, bounded by the campaign's failed count
//!
//! Completion is decided by the aggregator once all receipts are persisted.

mod config;
mod render;
mod runner;
mod types;

pub use config::DeliveryConfig;
pub use render::render_message;
pub use runner::DeliveryOrchestrator;
pub use types::{DeliveryReport, OrchestratorError, PassReport};
