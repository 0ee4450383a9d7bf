//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Vendor sends and receipt ingestion
//! - Batch aggregation (flushes, storage failures)
//! - Scheduling and delivery runs

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Vendor Metrics
// =============================================================================

/// Vendor send attempts by result.
pub static VENDOR_SENDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("courier_vendor_sends_total", "Total vendor send attempts"),
        &["result"], // "accepted", "rejected", "timeout"
    )
    .unwrap()
});

/// Delivery receipts dispatched by the simulator.
pub static VENDOR_RECEIPTS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_vendor_receipts_dispatched_total",
            "Total delivery receipts dispatched by the simulator",
        ),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

// =============================================================================
// Receipt Ingestion Metrics
// =============================================================================

/// Delivery receipts received by result.
pub static RECEIPTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_receipts_received_total",
            "Total delivery receipts received",
        ),
        &["result"], // "accepted", "invalid", "queue_full", "closed"
    )
    .unwrap()
});

/// Receipts handed to the aggregator by result.
pub static RECEIPTS_ROUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_receipts_routed_total",
            "Total delivery receipts routed to the aggregator",
        ),
        &["result"], // "queued", "duplicate", "unknown_batch", "unknown_message", "error"
    )
    .unwrap()
});

// =============================================================================
// Aggregator Metrics
// =============================================================================

/// Flushes by trigger.
pub static FLUSHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("courier_flushes_total", "Total aggregator flushes"),
        &["trigger"], // "threshold", "staleness", "timer", "manual", "shutdown"
    )
    .unwrap()
});

/// Flushes that hit a storage error and were kept for retry.
pub static FLUSH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "courier_flush_failures_total",
        "Total aggregator flushes that failed to persist",
    )
    .unwrap()
});

/// Outcomes persisted by status.
pub static OUTCOMES_PERSISTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_outcomes_persisted_total",
            "Total delivery outcomes persisted",
        ),
        &["status"], // "delivered", "failed"
    )
    .unwrap()
});

/// Batches currently tracked by the aggregator.
pub static ACTIVE_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "courier_active_batches",
        "Batches currently tracked by the aggregator",
    )
    .unwrap()
});

// =============================================================================
// Scheduler / Delivery Metrics
// =============================================================================

/// Scheduler ticks.
pub static SCHEDULER_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("courier_scheduler_ticks_total", "Total scheduler ticks").unwrap()
});

/// Campaigns claimed by the scheduler.
pub static CAMPAIGNS_CLAIMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "courier_campaigns_claimed_total",
        "Total campaigns claimed for delivery",
    )
    .unwrap()
});

/// Campaigns reaching a terminal state.
pub static CAMPAIGNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_campaigns_finished_total",
            "Total campaigns reaching a terminal state",
        ),
        &["status"], // "completed", "failed"
    )
    .unwrap()
});

/// Delivery run duration in seconds.
pub static DELIVERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "courier_delivery_duration_seconds",
            "Duration of a campaign delivery run (send phase)",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["result"], // "ok", "failed", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Vendor
        Box::new(VENDOR_SENDS.clone()),
        Box::new(VENDOR_RECEIPTS_DISPATCHED.clone()),
        // Receipts
        Box::new(RECEIPTS_RECEIVED.clone()),
        Box::new(RECEIPTS_ROUTED.clone()),
        // Aggregator
        Box::new(FLUSHES.clone()),
        Box::new(FLUSH_FAILURES.clone()),
        Box::new(OUTCOMES_PERSISTED.clone()),
        Box::new(ACTIVE_BATCHES.clone()),
        // Scheduler / delivery
        Box::new(SCHEDULER_TICKS.clone()),
        Box::new(CAMPAIGNS_CLAIMED.clone()),
        Box::new(CAMPAIGNS_FINISHED.clone()),
        Box::new(DELIVERY_DURATION.clone()),
    ]
}
