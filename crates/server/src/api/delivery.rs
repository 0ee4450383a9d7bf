//! Delivery pipeline status.

use axum::{extract::State, Json};
use courier_core::BatchStats;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeliveryStatusResponse {
    /// Whether the scheduler loop is ticking
    pub scheduler_running: bool,
    /// Runs started by the scheduler that have not finished
    pub scheduler_in_flight: usize,
    /// Receipts waiting in the ingestion queue
    pub receipts_queued: usize,
    /// Batches the aggregator is tracking
    pub batches: Vec<BatchStats>,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<DeliveryStatusResponse> {
    let (scheduler_running, scheduler_in_flight) = match state.scheduler() {
        Some(scheduler) => (scheduler.is_running(), scheduler.in_flight()),
        None => (false, 0),
    };

    Json(DeliveryStatusResponse {
        scheduler_running,
        scheduler_in_flight,
        receipts_queued: state.ingestor().queued(),
        batches: state.aggregator().all_stats(),
    })
}
