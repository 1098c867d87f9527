//! Store error types.

use lnmt_core::{ErrorClass, StableCoded};
use thiserror::Error;

/// Errors raised by store backends and the layers above them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed (I/O, database error).
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored value failed to (de)serialize.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// A conditional update observed a different current value.
    #[error("compare-and-swap conflict on {namespace}:{key}")]
    CasConflict {
        /// Namespace of the contested key.
        namespace: String,
        /// The contested key.
        key: String,
    },

    /// A migration step failed.
    #[error("migration {version} failed: {detail}")]
    Migration {
        /// Target schema version of the failing step.
        version: u32,
        /// What went wrong.
        detail: String,
    },

    /// The store refused an operation (e.g. unknown namespace policy).
    #[error("store misuse: {0}")]
    Misuse(String),
}

impl StableCoded for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "store_backend",
            Self::Serialization(_) => "store_serialization",
            Self::CasConflict { .. } => "store_conflict",
            Self::Migration { .. } => "store_migration",
            Self::Misuse(_) => "store_misuse",
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::Backend(_) => ErrorClass::Transient,
            Self::Serialization(_) | Self::Migration { .. } => ErrorClass::Bug,
            Self::CasConflict { .. } => ErrorClass::Policy,
            Self::Misuse(_) => ErrorClass::Bug,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
