//! Batch aggregation of delivery outcomes.
//!
//! Receipts arrive one at a time; the aggregator buffers them per delivery
//! run and persists them in bulk so a campaign of N recipients costs a
//! handful of writes instead of 2N.

#[allow(clippy::module_inception)]
mod aggregator;
mod batch;
mod config;
mod types;

pub use aggregator::{BatchAggregator, RECEIPT_TIMEOUT_ERROR};
pub use config::AggregatorConfig;
pub use types::{AddOutcomeResult, AggregatorError, BatchStats, FlushReport, FlushTrigger};
