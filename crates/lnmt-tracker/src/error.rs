//! Tracker error types.

use lnmt_core::{ErrorClass, StableCoded};
use lnmt_store::StoreError;
use thiserror::Error;

/// Errors raised by the device tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The lease file does not exist or cannot be opened. The poll cycle
    /// aborts without touching device rows.
    #[error("lease file unavailable: {path}: {detail}")]
    LeaseFile {
        /// Configured lease file path.
        path: String,
        /// Underlying error text.
        detail: String,
    },

    /// No device with this MAC is known.
    #[error("unknown device: {mac}")]
    UnknownDevice {
        /// The unknown MAC, canonical form.
        mac: String,
    },

    /// A VLAN threshold row failed its invariant (all fields > 0).
    #[error("invalid vlan threshold for vlan {vlan_id}: {detail}")]
    InvalidThreshold {
        /// The VLAN.
        vlan_id: u16,
        /// Violated rule.
        detail: String,
    },

    /// A classification rule regex does not compile.
    #[error("invalid pattern \"{pattern}\": {detail}")]
    InvalidPattern {
        /// The offending regex.
        pattern: String,
        /// Compiler diagnostic.
        detail: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StableCoded for TrackerError {
    fn code(&self) -> &'static str {
        match self {
            Self::LeaseFile { .. } => "lease_file_unavailable",
            Self::UnknownDevice { .. } => "unknown_device",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::Store(_) => "store_backend",
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::LeaseFile { .. } => ErrorClass::Transient,
            Self::UnknownDevice { .. } => ErrorClass::Input,
            Self::InvalidThreshold { .. } | Self::InvalidPattern { .. } => ErrorClass::Input,
            Self::Store(e) => e.class(),
        }
    }
}

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
