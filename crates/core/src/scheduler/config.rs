//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the campaign scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable/disable the recurring tick.
    /// When disabled, scheduled campaigns are only dispatched by an explicit tick.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to look for due campaigns (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    60_000 // 1 minute
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}
