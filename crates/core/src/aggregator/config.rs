//! Aggregator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the batch aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Period of the per-batch timer flush (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Pending outcomes that trigger an out-of-cycle flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Maximum age of the last flush before the next outcome forces one
    /// (milliseconds).
    #[serde(default = "default_max_staleness")]
    pub max_staleness_ms: u64,

    /// Delay before retrying a flush that hit a storage error (milliseconds).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// A batch with no activity for this long is evicted (milliseconds).
    /// Outstanding messages of a sealed batch are recorded as failed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
}

fn default_flush_interval() -> u64 {
    5000 // 5 seconds
}

fn default_flush_threshold() -> usize {
    10
}

fn default_max_staleness() -> u64 {
    10_000 // 10 seconds
}

fn default_retry_backoff() -> u64 {
    10_000 // 10 seconds
}

fn default_idle_timeout() -> u64 {
    600_000 // 10 minutes
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval(),
            flush_threshold: default_flush_threshold(),
            max_staleness_ms: default_max_staleness(),
            retry_backoff_ms: default_retry_backoff(),
            idle_timeout_ms: default_idle_timeout(),
        }
    }
}
