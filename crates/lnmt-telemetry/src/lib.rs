//! LNMT Telemetry - logging setup for daemon and CLI processes.
//!
//! This crate provides:
//! - Configurable logging with pretty, compact, and JSON formats
//! - `EnvFilter`-based level control with per-crate directives
//!
//! # Example
//!
//! ```rust,no_run
//! use lnmt_telemetry::{setup_logging, LogConfig, LogFormat};
//!
//! # fn main() -> Result<(), lnmt_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("lnmt_sched=debug");
//! setup_logging(&config)?;
//! tracing::info!("daemon starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{setup_default_logging, setup_logging, LogConfig, LogFormat};
