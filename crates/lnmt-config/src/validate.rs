//! Validation of the merged configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Check the merged configuration against hard rules.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] naming the first offending key.
pub fn validate(config: &Config) -> ConfigResult<()> {
    if config.scheduler.max_workers == 0 {
        return Err(invalid("scheduler.max_workers must be > 0"));
    }
    if config.tracker.poll_interval_s == 0 {
        return Err(invalid("tracker.poll_interval_s must be > 0"));
    }
    if config.tracker.lease_file.is_empty() {
        return Err(invalid("tracker.lease_file must be set"));
    }
    if config.auth.session_idle_s == 0 || config.auth.session_remember_s == 0 {
        return Err(invalid("auth session lifetimes must be > 0"));
    }
    if config.auth.lockout_threshold == 0 {
        return Err(invalid("auth.lockout_threshold must be > 0"));
    }
    if config.auth.lockout_window_s == 0 || config.auth.lockout_duration_s == 0 {
        return Err(invalid("auth lockout window and duration must be > 0"));
    }
    if config.health.heal_max_attempts == 0 || config.health.heal_window_s == 0 {
        return Err(invalid("health self-heal cap must be > 0"));
    }
    match config.logging.level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        other => {
            return Err(invalid(&format!("logging.level unknown: {other}")));
        }
    }
    match config.logging.format.as_str() {
        "pretty" | "compact" | "json" => {}
        other => {
            return Err(invalid(&format!("logging.format unknown: {other}")));
        }
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.scheduler.max_workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "loud".to_owned();
        assert!(validate(&config).is_err());
    }
}
