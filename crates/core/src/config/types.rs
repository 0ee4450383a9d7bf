use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::aggregator::AggregatorConfig;
use crate::orchestrator::DeliveryConfig;
use crate::scheduler::SchedulerConfig;
use crate::vendor::{VendorConfig, VendorMode};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("courier.db")
}

/// Delivery receipt ingestion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiptConfig {
    /// Capacity of the queue between the webhook and the aggregator.
    /// Receipts arriving while it is full are refused, never awaited.
    #[serde(default = "default_receipt_buffer")]
    pub buffer_size: usize,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_receipt_buffer(),
        }
    }
}

fn default_receipt_buffer() -> usize {
    10_000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub delivery: DeliveryConfig,
    pub aggregator: AggregatorConfig,
    pub receipts: ReceiptConfig,
    pub vendor: SanitizedVendorConfig,
}

/// Vendor config with the API key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedVendorConfig {
    pub mode: String,
    pub send_url: Option<String>,
    pub api_key_configured: bool,
    pub callback_url: String,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub delivered_ratio: f64,
    pub reject_ratio: f64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let vendor = &config.vendor;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            scheduler: config.scheduler.clone(),
            delivery: config.delivery.clone(),
            aggregator: config.aggregator.clone(),
            receipts: config.receipts.clone(),
            vendor: SanitizedVendorConfig {
                mode: match vendor.mode {
                    VendorMode::Simulated => "simulated".to_string(),
                    VendorMode::Http => "http".to_string(),
                },
                send_url: vendor.send_url.clone(),
                api_key_configured: vendor
                    .api_key
                    .as_ref()
                    .is_some_and(|key| !key.is_empty()),
                callback_url: vendor.callback_url.clone(),
                min_delay_ms: vendor.min_delay_ms,
                max_delay_ms: vendor.max_delay_ms,
                delivered_ratio: vendor.delivered_ratio,
                reject_ratio: vendor.reject_ratio,
            },
        }
    }
}
