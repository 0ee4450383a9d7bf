//! Delivery configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the delivery orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Recipients per batch. Also the audience page size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent vendor sends within a batch.
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    /// Time allowed for the vendor to acknowledge a send (milliseconds).
    /// A send that times out is treated as rejected.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Passes per run, and the cap on the campaign's failed attempt count.
    /// Later passes re-send only recipients whose send was rejected.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before a retry pass (milliseconds).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Maximum recipients per run (0 = unlimited).
    #[serde(default = "default_max_audience")]
    pub max_audience: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_send_concurrency() -> usize {
    10
}

fn default_send_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000 // 1 second
}

fn default_max_audience() -> usize {
    1000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_concurrency: default_send_concurrency(),
            send_timeout_ms: default_send_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            max_audience: default_max_audience(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeliveryConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.send_concurrency, 10);
        assert_eq!(config.send_timeout_ms, 10_000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_backoff_ms, 1000);
        assert_eq!(config.max_audience, 1000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            batch_size = 50
            send_concurrency = 4
            send_timeout_ms = 2000
            max_attempts = 5
            retry_backoff_ms = 0
            max_audience = 0
        "#;
        let config: DeliveryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.send_concurrency, 4);
        assert_eq!(config.send_timeout_ms, 2000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff_ms, 0);
        assert_eq!(config.max_audience, 0);
    }
}
