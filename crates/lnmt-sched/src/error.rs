//! Scheduler error types.

use lnmt_core::{ErrorClass, JobId, StableCoded};
use lnmt_store::StoreError;
use thiserror::Error;

use crate::cron::CronParseError;

/// Errors raised by the scheduler's public operations.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The cron expression did not parse.
    #[error(transparent)]
    InvalidSchedule(#[from] CronParseError),

    /// A job with this id is already registered.
    #[error("duplicate job id: {job_id}")]
    DuplicateId {
        /// The contested id.
        job_id: JobId,
    },

    /// Registration would create a dependency cycle.
    #[error("dependency cycle through job: {job_id}")]
    CycleDetected {
        /// A job on the cycle.
        job_id: JobId,
    },

    /// A declared dependency is not registered.
    #[error("unknown dependency: {dependency} (required by {job_id})")]
    UnknownDependency {
        /// The job declaring the dependency.
        job_id: JobId,
        /// The missing dependency.
        dependency: JobId,
    },

    /// No job with this id exists.
    #[error("unknown job: {job_id}")]
    UnknownJob {
        /// The missing id.
        job_id: JobId,
    },

    /// The invocation target is not in the function registry.
    #[error("unknown job target: {target}")]
    UnknownTarget {
        /// The unresolved target name.
        target: String,
    },

    /// The invocation target name is reserved and cannot be bound.
    #[error("reserved job target: {target}")]
    ReservedTarget {
        /// The reserved name.
        target: String,
    },

    /// A manual run was requested while dependencies are unsatisfied.
    #[error("dependencies unsatisfied for job: {job_id}")]
    DependencyUnsatisfied {
        /// The gated job.
        job_id: JobId,
    },

    /// A run is already in flight for this job.
    #[error("job already running: {job_id}")]
    AlreadyRunning {
        /// The running job.
        job_id: JobId,
    },

    /// The job's timeout or retry parameters are out of range.
    #[error("invalid job parameters for {job_id}: {detail}")]
    InvalidParameters {
        /// The offending job.
        job_id: JobId,
        /// Which rule was violated.
        detail: String,
    },

    /// A run attempted an illegal status transition. This is a bug; the
    /// transition is rejected and the scheduler continues.
    #[error("illegal run transition {from} -> {to} for job {job_id}")]
    IllegalTransition {
        /// The job whose run misbehaved.
        job_id: JobId,
        /// Status before.
        from: String,
        /// Status requested.
        to: String,
    },

    /// The job-definitions document did not parse.
    #[error("invalid job definitions: {0}")]
    InvalidDefinitions(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StableCoded for SchedError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSchedule(_) => "invalid_schedule",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::UnknownJob { .. } => "unknown_job",
            Self::UnknownTarget { .. } => "unknown_target",
            Self::ReservedTarget { .. } => "reserved_target",
            Self::DependencyUnsatisfied { .. } => "dependency_unsatisfied",
            Self::AlreadyRunning { .. } => "already_running",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::InvalidDefinitions(_) => "invalid_definitions",
            Self::Store(_) => "store_backend",
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidSchedule(_)
            | Self::DuplicateId { .. }
            | Self::UnknownDependency { .. }
            | Self::UnknownJob { .. }
            | Self::UnknownTarget { .. }
            | Self::ReservedTarget { .. }
            | Self::InvalidParameters { .. }
            | Self::InvalidDefinitions(_) => ErrorClass::Input,
            Self::CycleDetected { .. }
            | Self::DependencyUnsatisfied { .. }
            | Self::AlreadyRunning { .. } => ErrorClass::Policy,
            Self::IllegalTransition { .. } => ErrorClass::Bug,
            Self::Store(e) => e.class(),
        }
    }
}

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;
