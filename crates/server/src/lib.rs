//! HTTP surface of the courier service.

pub mod api;
pub mod metrics;
pub mod state;
