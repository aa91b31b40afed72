use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Poll intervals and retention windows are non-zero
/// - Early thumbnail threshold is a percentage
/// - Webhook URL, when set, is http(s)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let lifecycle = &config.lifecycle;
    if lifecycle.transfer_poll_interval_ms == 0 || lifecycle.conversion_poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle poll intervals must be greater than 0".to_string(),
        ));
    }
    if lifecycle.simple_retention_secs == 0 || lifecycle.multi_file_retention_secs == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle retention windows must be greater than 0".to_string(),
        ));
    }
    if lifecycle.command_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle.command_buffer must be greater than 0".to_string(),
        ));
    }

    let threshold = config.pipeline.early_thumbnail_threshold_pct;
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.early_thumbnail_threshold_pct must be within 0..=100, got {}",
            threshold
        )));
    }

    if let Some(url) = &config.notify.webhook_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "notify.webhook_url must be an http(s) URL, got {}",
                url
            )));
        }
    }

    if config.notify.channel_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "notify.channel_capacity must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::IpAddr;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_poll_interval_fails() {
        let mut config = Config::default();
        config.lifecycle.conversion_poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_threshold_out_of_range_fails() {
        let mut config = Config::default();
        config.pipeline.early_thumbnail_threshold_pct = 150.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_webhook_scheme() {
        let mut config = Config::default();
        config.notify.webhook_url = Some("ftp://example.com".to_string());
        assert!(validate_config(&config).is_err());

        config.notify.webhook_url = Some("https://example.com/hook".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
