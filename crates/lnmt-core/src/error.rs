//! Error taxonomy shared by all subsystems.
//!
//! Subsystems never raise through their public operation boundary without
//! classifying the failure. The classes drive retry and surfacing policy:
//! input errors and policy violations go straight back to the caller,
//! transient failures are retried within the subsystem's budget, bugs are
//! fatal for the operation but never for the subsystem.

use serde::{Deserialize, Serialize};

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller supplied bad input (invalid cron, unknown id, malformed line).
    /// Reported to the caller, never retried, audit-logged at INFO.
    Input,
    /// Infrastructure hiccup (store unavailable, probe timeout). Retried
    /// within the subsystem's budget before surfacing.
    Transient,
    /// A policy said no (lockout, dependency unsatisfied, cycle detected).
    /// Reported with a stable code, never retried.
    Policy,
    /// Invariant violation or illegal state transition. Fatal for the
    /// operation; the subsystem continues on the next tick.
    Bug,
    /// One unit of a batch failed; the batch proceeds.
    Partial,
}

impl ErrorClass {
    /// Whether failures of this class may be retried automatically.
    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors that carry a stable, user-visible code.
///
/// The code is part of the wire contract (CLI exit text, REST `error.code`)
/// and must never change once shipped. The message is human-readable and
/// must be scrubbed of secrets before it gets here.
pub trait StableCoded {
    /// Stable machine-readable code, e.g. `"cycle_detected"`.
    fn code(&self) -> &'static str;

    /// Classification of this error.
    fn class(&self) -> ErrorClass;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorClass::Transient.retryable());
        assert!(!ErrorClass::Input.retryable());
        assert!(!ErrorClass::Policy.retryable());
        assert!(!ErrorClass::Bug.retryable());
        assert!(!ErrorClass::Partial.retryable());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::Policy).unwrap();
        assert_eq!(json, "\"policy\"");
    }
}
