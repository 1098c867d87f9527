//! Configuration types.
//!
//! Field names and defaults follow the operational settings object of the
//! public interface: `scheduler.max_workers`, `tracker.poll_interval_s`,
//! `detection.ping_window`, `auth.lockout_threshold`, and so on.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler pool and retention settings.
    pub scheduler: SchedulerSection,
    /// Device tracker polling settings.
    pub tracker: TrackerSection,
    /// Online-detection thresholds.
    pub detection: DetectionSection,
    /// Authentication and lockout policy.
    pub auth: AuthSection,
    /// Store backend paths.
    pub store: StoreSection,
    /// Logging level and format.
    pub logging: LoggingSection,
    /// Health monitor and self-heal settings.
    pub health: HealthSection,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Size of the worker pool.
    pub max_workers: usize,
    /// Days of run history to retain.
    pub history_retention_days: u32,
    /// IANA timezone name used for cron evaluation.
    pub timezone: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: 5,
            history_retention_days: 30,
            timezone: "UTC".to_owned(),
        }
    }
}

/// Device tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// Seconds between poll cycles.
    pub poll_interval_s: u32,
    /// Path to the DHCP lease file.
    pub lease_file: String,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            poll_interval_s: 120,
            lease_file: "/var/lib/misc/dnsmasq.leases".to_owned(),
        }
    }
}

/// Online-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    /// Seconds within which a ping response counts as activity.
    pub ping_window: u32,
    /// Minimum inbound byte delta for traffic-based activity.
    pub min_bytes_in: u64,
    /// Minimum outbound byte delta for traffic-based activity.
    pub min_bytes_out: u64,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            ping_window: 3,
            min_bytes_in: 1024,
            min_bytes_out: 1024,
        }
    }
}

/// Authentication policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Idle session lifetime in seconds.
    pub session_idle_s: u32,
    /// Remember-me session lifetime in seconds.
    pub session_remember_s: u32,
    /// Consecutive failures before lockout.
    pub lockout_threshold: u32,
    /// Window in which failures are counted, in seconds.
    pub lockout_window_s: u32,
    /// Lockout duration in seconds.
    pub lockout_duration_s: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_idle_s: 1800,
            session_remember_s: 86_400,
            lockout_threshold: 5,
            lockout_window_s: 900,
            lockout_duration_s: 900,
        }
    }
}

/// Store backend paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Configuration-tier database path.
    pub path: String,
    /// Optional operational-tier database path. Empty string disables the
    /// second tier; operational data then shares the configuration tier.
    pub ops_path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: "/var/lib/lnmt/lnmt.db".to_owned(),
            ops_path: String::new(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level: `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
    /// Format: `pretty`, `compact`, `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Self-heal attempts allowed per probe per window.
    pub heal_max_attempts: u32,
    /// Self-heal attempt window in seconds.
    pub heal_window_s: u32,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            heal_max_attempts: 3,
            heal_window_s: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_workers, 5);
        assert_eq!(config.scheduler.history_retention_days, 30);
        assert_eq!(config.tracker.poll_interval_s, 120);
        assert_eq!(config.detection.ping_window, 3);
        assert_eq!(config.detection.min_bytes_in, 1024);
        assert_eq!(config.detection.min_bytes_out, 1024);
        assert_eq!(config.auth.session_idle_s, 1800);
        assert_eq!(config.auth.session_remember_s, 86_400);
        assert_eq!(config.auth.lockout_threshold, 5);
        assert_eq!(config.health.heal_max_attempts, 3);
        assert_eq!(config.health.heal_window_s, 3600);
    }

    #[test]
    fn test_bare_section_header_parses() {
        let config: Config = toml::from_str("[scheduler]\n[auth]\n").unwrap();
        assert_eq!(config.scheduler.max_workers, 5);
        assert_eq!(config.auth.lockout_threshold, 5);
    }
}
