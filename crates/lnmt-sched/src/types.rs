//! Job and run types, and the run status state machine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use lnmt_core::{JobId, RunId};
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::{SchedError, SchedResult};

/// Upper bound on stored run output. Longer output is truncated.
pub const MAX_RUN_OUTPUT_BYTES: usize = 8 * 1024;

/// Dispatch priority. Higher dispatches first within a tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Background maintenance.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Time-sensitive work.
    High,
    /// Must-run work (health recovery, safety actions).
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("LOW"),
            Self::Normal => f.write_str("NORMAL"),
            Self::High => f.write_str("HIGH"),
            Self::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// A registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable id, unique across the registry.
    pub id: JobId,
    /// Human-readable name.
    pub name: String,
    /// Function-registry target invoked for each run.
    pub target: String,
    /// When the job fires.
    pub schedule: CronExpr,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
    /// Retries after the first failed attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Base retry delay; doubles per retry, capped at `timeout_s`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_s: u32,
    /// Per-attempt wall-clock budget.
    #[serde(default = "default_timeout")]
    pub timeout_s: u32,
    /// Jobs that must have completed in the current window before this
    /// one is admitted.
    #[serde(default)]
    pub dependencies: BTreeSet<JobId>,
    /// Disabled jobs are never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Positional arguments handed to the target.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments handed to the target.
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

fn default_retry_delay() -> u32 {
    60
}

fn default_timeout() -> u32 {
    300
}

fn default_enabled() -> bool {
    true
}

impl Job {
    /// Check parameter invariants (`timeout_s > 0` and a sane backoff base).
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidParameters`] naming the violated rule.
    pub fn check_parameters(&self) -> SchedResult<()> {
        if self.timeout_s == 0 {
            return Err(SchedError::InvalidParameters {
                job_id: self.id.clone(),
                detail: "timeout_s must be > 0".to_owned(),
            });
        }
        if self.max_retries > 0 && self.retry_delay_s == 0 {
            return Err(SchedError::InvalidParameters {
                job_id: self.id.clone(),
                detail: "retry_delay_s must be > 0 when retries are configured".to_owned(),
            });
        }
        Ok(())
    }
}

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Cron tick.
    Schedule,
    /// Operator `run_now`.
    Manual,
    /// Retry of a failed attempt.
    Retry,
    /// Submitted on behalf of another subsystem (self-heal).
    Dependency,
}

/// Status of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// Created, waiting for a worker.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (including timeout and exhausted retries).
    Failed,
    /// Stopped by shutdown or operator action.
    Cancelled,
    /// Failed with retry budget remaining; finalized to `Failed` once the
    /// retry attempt starts.
    Retrying,
}

impl RunStatus {
    /// Whether the status admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, to: RunStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Completed | Self::Failed | Self::Retrying | Self::Cancelled
                )
                | (Self::Retrying, Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Running => f.write_str("RUNNING"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Cancelled => f.write_str("CANCELLED"),
            Self::Retrying => f.write_str("RETRYING"),
        }
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Unique run id.
    pub run_id: RunId,
    /// Owning job.
    pub job_id: JobId,
    /// Current status.
    pub status: RunStatus,
    /// When the attempt was created.
    pub started_at: DateTime<Utc>,
    /// When the attempt reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Which retry this is (0 for the first attempt).
    pub retry_count: u32,
    /// Error text for failed attempts.
    pub error: Option<String>,
    /// Bounded captured output.
    pub output: Option<String>,
    /// What caused the run.
    pub trigger: Trigger,
}

impl JobRun {
    /// Create a fresh pending run.
    #[must_use]
    pub fn pending(job_id: JobId, trigger: Trigger, retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::new(),
            job_id,
            status: RunStatus::Pending,
            started_at: now,
            ended_at: None,
            retry_count,
            error: None,
            output: None,
            trigger,
        }
    }

    /// Move to `next`, enforcing the state machine and the
    /// `ended_at >= started_at` invariant.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::IllegalTransition`] for a move the machine
    /// does not admit; the run is left unchanged.
    pub fn transition(&mut self, next: RunStatus, now: DateTime<Utc>) -> SchedResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedError::IllegalTransition {
                job_id: self.job_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(now.max(self.started_at));
        }
        Ok(())
    }

    /// Attach output, truncating to [`MAX_RUN_OUTPUT_BYTES`].
    pub fn set_output(&mut self, output: String) {
        if output.len() > MAX_RUN_OUTPUT_BYTES {
            let mut cut = MAX_RUN_OUTPUT_BYTES;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            self.output = Some(output[..cut].to_owned());
        } else {
            self.output = Some(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job {
            id: JobId::new(id),
            name: id.to_owned(),
            target: "noop".to_owned(),
            schedule: "* * * * *".parse().unwrap(),
            priority: Priority::Normal,
            max_retries: 0,
            retry_delay_s: 60,
            timeout_s: 300,
            dependencies: BTreeSet::new(),
            enabled: true,
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut j = job("j");
        j.timeout_s = 0;
        assert!(j.check_parameters().is_err());
    }

    #[test]
    fn test_legal_run_lifecycle() {
        let now = Utc::now();
        let mut run = JobRun::pending(JobId::new("j"), Trigger::Schedule, 0, now);
        run.transition(RunStatus::Running, now).unwrap();
        run.transition(RunStatus::Completed, now).unwrap();
        assert!(run.ended_at.unwrap() >= run.started_at);
    }

    #[test]
    fn test_illegal_transition_rejected_and_state_kept() {
        let now = Utc::now();
        let mut run = JobRun::pending(JobId::new("j"), Trigger::Schedule, 0, now);
        run.transition(RunStatus::Running, now).unwrap();
        run.transition(RunStatus::Completed, now).unwrap();

        let err = run.transition(RunStatus::Running, now).unwrap_err();
        assert!(matches!(err, SchedError::IllegalTransition { .. }));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_retrying_finalizes_to_failed() {
        let now = Utc::now();
        let mut run = JobRun::pending(JobId::new("j"), Trigger::Schedule, 0, now);
        run.transition(RunStatus::Running, now).unwrap();
        run.transition(RunStatus::Retrying, now).unwrap();
        assert!(run.ended_at.is_none());
        run.transition(RunStatus::Failed, now).unwrap();
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn test_ended_at_never_precedes_started_at() {
        let now = Utc::now();
        let mut run = JobRun::pending(JobId::new("j"), Trigger::Schedule, 0, now);
        run.transition(RunStatus::Running, now).unwrap();
        // Terminal transition stamped with an earlier clock still respects
        // the invariant.
        run.transition(RunStatus::Failed, now - chrono::Duration::seconds(5))
            .unwrap();
        assert!(run.ended_at.unwrap() >= run.started_at);
    }

    #[test]
    fn test_output_truncated_at_bound() {
        let now = Utc::now();
        let mut run = JobRun::pending(JobId::new("j"), Trigger::Manual, 0, now);
        run.set_output("x".repeat(MAX_RUN_OUTPUT_BYTES + 100));
        assert_eq!(run.output.unwrap().len(), MAX_RUN_OUTPUT_BYTES);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::to_string(&Priority::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }
}
