//! Builtin job bodies.
//!
//! Periodic work inside LNMT itself runs through the same scheduler as
//! operator jobs: the tracker poll, the health sweep, history pruning,
//! and session pruning are all registered targets that job definitions
//! can reference by name.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lnmt_auth::AuthEngine;
use lnmt_core::JobId;
use lnmt_health::{HealthMonitor, RecoveryRunner};
use lnmt_sched::{JobFnRegistry, SchedResult, SchedStorage, Scheduler};
use lnmt_tracker::DeviceTracker;

/// Target name for the tracker poll cycle.
pub const TRACKER_POLL: &str = "tracker.poll";
/// Target name for the health probe sweep.
pub const HEALTH_SWEEP: &str = "health.sweep";
/// Target name for scheduler history pruning.
pub const SCHED_PRUNE: &str = "scheduler.prune_history";
/// Target name for expired-session pruning.
pub const AUTH_PRUNE: &str = "auth.prune_sessions";

/// All builtin target names.
#[must_use]
pub fn builtin_targets() -> &'static [&'static str] {
    &[TRACKER_POLL, HEALTH_SWEEP, SCHED_PRUNE, AUTH_PRUNE]
}

/// Register the builtin job bodies.
///
/// # Errors
///
/// Propagates registry errors (none of the builtin names are reserved).
pub fn register_builtins(
    registry: &JobFnRegistry,
    tracker: Arc<DeviceTracker>,
    health: Arc<HealthMonitor>,
    sched_storage: SchedStorage,
    history_retention_days: u32,
    auth: Arc<AuthEngine>,
) -> SchedResult<()> {
    {
        let tracker = Arc::clone(&tracker);
        registry.register_fn(TRACKER_POLL, move |_ctx| {
            let tracker = Arc::clone(&tracker);
            async move {
                let summary = tracker
                    .poll_once(Utc::now())
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_string(&summary).map_err(|e| e.to_string())
            }
        })?;
    }

    {
        let health = Arc::clone(&health);
        registry.register_fn(HEALTH_SWEEP, move |_ctx| {
            let health = Arc::clone(&health);
            async move {
                let ran = health.sweep(Utc::now()).await.map_err(|e| e.to_string())?;
                Ok(format!("probes run: {ran}"))
            }
        })?;
    }

    {
        let storage = sched_storage;
        registry.register_fn(SCHED_PRUNE, move |_ctx| {
            let storage = storage.clone();
            async move {
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(history_retention_days));
                let pruned = storage.prune_runs(cutoff).map_err(|e| e.to_string())?;
                Ok(format!("runs pruned: {pruned}"))
            }
        })?;
    }

    registry.register_fn(AUTH_PRUNE, move |_ctx| {
        let auth = Arc::clone(&auth);
        async move {
            let pruned = auth.prune_sessions(Utc::now()).map_err(|e| e.to_string())?;
            Ok(format!("sessions pruned: {pruned}"))
        }
    })?;

    Ok(())
}

/// Recovery runner that submits the probe's recovery job to the
/// scheduler as a manual run.
pub struct SchedulerRecovery {
    scheduler: Scheduler,
}

impl SchedulerRecovery {
    /// Wrap a scheduler handle.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl RecoveryRunner for SchedulerRecovery {
    async fn submit(&self, job_id: &JobId) -> Result<(), String> {
        self.scheduler
            .run_now("health-monitor", job_id)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl std::fmt::Debug for SchedulerRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRecovery").finish_non_exhaustive()
    }
}

/// Recovery runner for contexts that must never submit jobs (read-only
/// CLI paths).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecovery;

#[async_trait]
impl RecoveryRunner for NullRecovery {
    async fn submit(&self, _job_id: &JobId) -> Result<(), String> {
        Err("recovery submission disabled in this context".to_owned())
    }
}
