//! Logging configuration and subscriber installation.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{TelemetryError, TelemetryResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-oriented multi-line output.
    Pretty,
    /// Single-line output for terminals and journals.
    #[default]
    Compact,
    /// Structured JSON for log shippers.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::InvalidFilter(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level (`error`..`trace`).
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Extra per-crate directives, e.g. `lnmt_sched=debug`.
    pub directives: Vec<String>,
}

impl LogConfig {
    /// Create a config with the given base level.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            directives: Vec::new(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Add a per-crate directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut spec = self.level.clone();
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        spec.parse()
            .map_err(|e| TelemetryError::InvalidFilter(format!("{spec}: {e}")))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG`, when set, overrides the configured level and directives.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if the filter spec does not
/// parse, or [`TelemetryError::AlreadyInitialized`] if a subscriber is
/// already installed in this process.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) => spec
            .parse()
            .map_err(|e| TelemetryError::InvalidFilter(format!("RUST_LOG: {e}")))?,
        Err(_) => config.filter()?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install logging with defaults (`info`, compact).
///
/// # Errors
///
/// Same conditions as [`setup_logging`].
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_filter_includes_directives() {
        let config = LogConfig::new("warn").with_directive("lnmt_tracker=trace");
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LogConfig::new("loud");
        assert!(config.filter().is_err());
    }
}
