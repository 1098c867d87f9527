//! Health monitor error types.

use lnmt_core::{ErrorClass, ProbeId, StableCoded};
use lnmt_store::StoreError;
use thiserror::Error;

/// Errors raised by the health monitor.
#[derive(Debug, Error)]
pub enum HealthError {
    /// No probe with this id is configured.
    #[error("unknown probe: {probe_id}")]
    UnknownProbe {
        /// The missing probe id.
        probe_id: ProbeId,
    },

    /// A probe configuration failed validation.
    #[error("invalid probe {probe_id}: {detail}")]
    InvalidProbe {
        /// The offending probe.
        probe_id: ProbeId,
        /// Violated rule.
        detail: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StableCoded for HealthError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownProbe { .. } => "unknown_probe",
            Self::InvalidProbe { .. } => "invalid_probe",
            Self::Store(_) => "store_backend",
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownProbe { .. } | Self::InvalidProbe { .. } => ErrorClass::Input,
            Self::Store(e) => e.class(),
        }
    }
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
