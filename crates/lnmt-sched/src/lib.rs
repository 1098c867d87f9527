//! LNMT Sched - the job scheduler and execution engine.
//!
//! A single ticker wakes at each wall-clock minute boundary, evaluates
//! every enabled job's cron expression, gates on dependencies, and
//! dispatches admitted jobs to a bounded worker pool. Failures retry with
//! exponential backoff as separate run rows; all outcomes land in durable
//! history. Job bodies are resolved through a process-wide function
//! registry populated at startup.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cron;
mod error;
mod export;
mod registry;
mod scheduler;
mod storage;
mod types;

pub use cron::{CronExpr, CronParseError};
pub use error::{SchedError, SchedResult};
pub use export::{export_jobs, import_jobs, validate_definitions};
pub use registry::{FnJob, JobContext, JobFn, JobFnRegistry, JobOutcome};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStatus};
pub use storage::SchedStorage;
pub use types::{Job, JobRun, Priority, RunStatus, Trigger, MAX_RUN_OUTPUT_BYTES};
