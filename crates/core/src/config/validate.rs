use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Upload limit is positive and upload/output directories differ
/// - Conversion and retention intervals are positive
/// - Rate limit allows at least one request when enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Storage validation
    if config.storage.max_upload_mb == 0 {
        return Err(invalid("storage.max_upload_mb must be greater than 0"));
    }
    if config.storage.upload_dir == config.storage.output_dir {
        return Err(invalid(
            "storage.upload_dir and storage.output_dir must be different directories",
        ));
    }

    // Conversion validation
    if config.conversion.max_parallel == 0 {
        return Err(invalid("conversion.max_parallel must be greater than 0"));
    }
    if config.conversion.timeout_secs == 0 {
        return Err(invalid("conversion.timeout_secs must be greater than 0"));
    }

    // Retention validation
    if config.retention.retention_hours == 0 {
        return Err(invalid("retention.retention_hours must be greater than 0"));
    }
    if config.retention.sweep_interval_secs == 0 {
        return Err(invalid("retention.sweep_interval_secs must be greater than 0"));
    }

    // Rate limit validation
    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_window == 0 {
            return Err(invalid(
                "rate_limit.requests_per_window must be greater than 0 when enabled",
            ));
        }
        if config.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs must be greater than 0 when enabled"));
        }
    }

    for (category, tool) in &config.converters {
        if tool.program.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "converters.{}.program cannot be empty",
                category
            )));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
