//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("cannot read config file {path}: {detail}")]
    Io {
        /// Path of the unreadable file.
        path: String,
        /// Underlying error text.
        detail: String,
    },

    /// A config file did not parse as TOML.
    #[error("cannot parse config file {path}: {detail}")]
    Parse {
        /// Path of the malformed file.
        path: String,
        /// Parser diagnostic.
        detail: String,
    },

    /// The merged configuration failed a validation rule.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
