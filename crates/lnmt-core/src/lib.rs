//! LNMT Core - Foundation types for the LNMT network control plane.
//!
//! This crate provides:
//! - Stable identifiers shared across subsystems (jobs, runs, users, probes)
//! - Canonical MAC address handling
//! - The error taxonomy every subsystem classifies its failures into
//! - Retry utilities with exponential backoff for transient failures

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod error;
pub mod mac;
pub mod retry;
pub mod types;

pub use error::{ErrorClass, StableCoded};
pub use mac::{MacAddr, MacParseError};
pub use retry::{retry, RetryConfig};
pub use types::{JobId, ProbeId, RunId, UserId, VlanId};
