//! Configuration validation.

use crate::config::{ClusterSettings, Config};

/// Validate cluster settings.
///
/// Checks for:
/// - A non-empty endpoint list
/// - SRV, direct connection and load-balanced endpoint counts
/// - Option combinations that cannot work together
/// - Heartbeat intervals
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem.
pub fn validate_settings(settings: &ClusterSettings) -> Result<(), String> {
    let mut errors = Vec::new();

    if settings.endpoints.is_empty() {
        errors.push("at least one endpoint must be configured".to_string());
    }

    if settings.is_srv() {
        if settings.endpoints.len() > 1 {
            errors.push("an SRV connection requires exactly one host".to_string());
        }
        if settings.direct_connection {
            errors.push("direct connection cannot be used with SRV".to_string());
        }
        if settings.srv_service_name.is_empty() {
            errors.push("the SRV service name cannot be empty".to_string());
        }
    }

    if settings.direct_connection && settings.endpoints.len() > 1 {
        errors.push(format!(
            "direct connection requires exactly one endpoint, found {}",
            settings.endpoints.len()
        ));
    }

    if settings.load_balanced {
        if settings.replica_set_name.is_some() {
            errors.push("load balanced mode cannot be used with a replica set name".to_string());
        }
        if settings.direct_connection {
            errors.push("load balanced mode cannot be used with direct connection".to_string());
        }
        if settings.srv_max_hosts > 0 {
            errors.push("srv_max_hosts cannot be used with load balanced mode".to_string());
        }
        if !settings.is_srv() && settings.endpoints.len() > 1 {
            errors.push("load balanced mode cannot be used with multiple host names".to_string());
        }
    }

    if settings.srv_max_hosts > 0 {
        if !settings.is_srv() {
            errors.push("srv_max_hosts requires an SRV connection".to_string());
        }
        if settings.replica_set_name.is_some() {
            errors.push("srv_max_hosts cannot be used with a replica set name".to_string());
        }
    }

    if settings.min_heartbeat_interval.is_zero() {
        errors.push("min_heartbeat_interval must be greater than zero".to_string());
    }

    if settings.heartbeat_interval < settings.min_heartbeat_interval {
        errors.push(format!(
            "heartbeat_interval ({:?}) must be at least min_heartbeat_interval ({:?})",
            settings.heartbeat_interval, settings.min_heartbeat_interval
        ));
    }

    if let Some(name) = &settings.replica_set_name {
        if name.is_empty() {
            errors.push("replica set name cannot be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Validate the whole configuration file.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if let Err(e) = validate_settings(&config.cluster) {
        errors.push(e);
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
