//! LNMT Health - probe scheduling, breach detection, bounded self-heal.
//!
//! Probes run on their configured intervals and record samples. A probe
//! that fails `failure_threshold` times in a row triggers its recovery
//! action (a scheduler job submission); recovery attempts are capped per
//! window, and a probe that exhausts the cap escalates to NOTIFIED and
//! stays quiet until an `ok` sample or a manual reset clears it. Every
//! attempt, whatever its outcome, writes one self-heal log row.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod checks;
mod error;
mod monitor;
mod storage;
mod types;

pub use checks::{CheckRunner, CustomCheck, DefaultCheckRunner};
pub use error::{HealthError, HealthResult};
pub use monitor::{HealthMonitor, HealPolicy, ProbeStatusSummary, RecoveryRunner};
pub use storage::HealthStorage;
pub use types::{HealState, HealthProbe, HealthSample, HealthStatus, ProbeKind, SelfHealLogRow};
