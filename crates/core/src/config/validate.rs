use super::{types::Config, ConfigError};
use crate::vendor::VendorMode;

/// Validate configuration values that serde cannot check on its own.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.delivery.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "delivery.batch_size must be greater than 0".to_string(),
        ));
    }

    if config.delivery.send_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "delivery.send_concurrency must be greater than 0".to_string(),
        ));
    }

    if config.delivery.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "delivery.max_attempts must be greater than 0".to_string(),
        ));
    }

    if config.aggregator.flush_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "aggregator.flush_threshold must be greater than 0".to_string(),
        ));
    }

    if config.receipts.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "receipts.buffer_size must be greater than 0".to_string(),
        ));
    }

    let vendor = &config.vendor;
    if vendor.mode == VendorMode::Http && vendor.send_url.as_deref().is_none_or(str::is_empty) {
        return Err(ConfigError::ValidationError(
            "vendor.send_url is required when vendor.mode = \"http\"".to_string(),
        ));
    }

    if vendor.min_delay_ms > vendor.max_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "vendor.min_delay_ms ({}) exceeds vendor.max_delay_ms ({})",
            vendor.min_delay_ms, vendor.max_delay_ms
        )));
    }

    for (name, ratio) in [
        ("vendor.delivered_ratio", vendor.delivered_ratio),
        ("vendor.reject_ratio", vendor.reject_ratio),
    ] {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between 0.0 and 1.0, got {}",
                name, ratio
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_http_vendor_requires_send_url() {
        let mut config = Config::default();
        config.vendor.mode = VendorMode::Http;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));

        config.vendor.send_url = Some("https://vendor.example/send".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_batch_size_fails() {
        let mut config = Config::default();
        config.delivery.batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_flush_threshold_fails() {
        let mut config = Config::default();
        config.aggregator.flush_threshold = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_inverted_vendor_delays_fails() {
        let mut config = Config::default();
        config.vendor.min_delay_ms = 5000;
        config.vendor.max_delay_ms = 1000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("min_delay_ms"));
    }

    #[test]
    fn test_validate_ratio_out_of_range_fails() {
        let mut config = Config::default();
        config.vendor.delivered_ratio = 1.5;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("delivered_ratio"));
    }
}
