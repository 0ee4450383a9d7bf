//! Campaign scheduler.
//!
//! A recurring tick claims campaigns whose dispatch time has passed and
//! hands each to the delivery orchestrator. Claims are conditional status
//! updates, so concurrent ticks (or processes) never dispatch a campaign
//! twice.

mod config;
mod runner;

pub use config::SchedulerConfig;
pub use runner::{CampaignScheduler, TickReport};
