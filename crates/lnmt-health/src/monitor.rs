//! The health monitor: probe sweeps, breach handling, bounded recovery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lnmt_core::{JobId, ProbeId};
use lnmt_events::{EventBus, LnmtEvent};
use serde::Serialize;
use tracing::{info, warn};

use crate::checks::CheckRunner;
use crate::error::{HealthError, HealthResult};
use crate::storage::HealthStorage;
use crate::types::{HealState, HealthProbe, HealthSample, HealthStatus, SelfHealLogRow};

/// Submits recovery jobs. The daemon implements this over the
/// scheduler's `run_now`; health stays decoupled from the scheduler
/// crate.
#[async_trait]
pub trait RecoveryRunner: Send + Sync {
    /// Submit the recovery job. `Err` text lands in the self-heal log.
    async fn submit(&self, job_id: &JobId) -> Result<(), String>;
}

/// Self-heal attempt cap.
#[derive(Debug, Clone, Copy)]
pub struct HealPolicy {
    /// Attempts allowed per probe per window.
    pub max_attempts: u32,
    /// Window length in seconds.
    pub window_s: u32,
}

impl Default for HealPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            window_s: 3600,
        }
    }
}

/// Per-probe status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeStatusSummary {
    /// The probe.
    pub probe_id: ProbeId,
    /// Latest sample status, if the probe ever ran.
    pub last_status: Option<HealthStatus>,
    /// Consecutive failures.
    pub consecutive_failures: u32,
    /// Whether the probe escalated to NOTIFIED.
    pub notified: bool,
    /// Recovery attempts in the current window.
    pub attempts_in_window: u32,
}

/// The health monitor and self-heal controller.
pub struct HealthMonitor {
    storage: HealthStorage,
    events: EventBus,
    checks: Arc<dyn CheckRunner>,
    recovery: Arc<dyn RecoveryRunner>,
    policy: HealPolicy,
}

impl HealthMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        storage: HealthStorage,
        events: EventBus,
        checks: Arc<dyn CheckRunner>,
        recovery: Arc<dyn RecoveryRunner>,
        policy: HealPolicy,
    ) -> Self {
        Self {
            storage,
            events,
            checks,
            recovery,
            policy,
        }
    }

    /// Register (or replace) a probe.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::InvalidProbe`] or a store error.
    pub fn put_probe(&self, probe: HealthProbe) -> HealthResult<()> {
        probe.validate()?;
        self.storage.put_probe(&probe)?;
        Ok(())
    }

    /// Remove a probe.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::UnknownProbe`] or a store error.
    pub fn delete_probe(&self, probe_id: &ProbeId) -> HealthResult<()> {
        if self.storage.get_probe(probe_id)?.is_none() {
            return Err(HealthError::UnknownProbe {
                probe_id: probe_id.clone(),
            });
        }
        Ok(self.storage.delete_probe(probe_id)?)
    }

    /// Run every probe whose interval has elapsed. Returns the number of
    /// probes that ran.
    ///
    /// # Errors
    ///
    /// Returns a store error if probe enumeration fails; individual probe
    /// failures are contained.
    pub async fn sweep(&self, now: DateTime<Utc>) -> HealthResult<usize> {
        let mut ran = 0;
        for probe in self.storage.list_probes()? {
            let state = self.storage.get_heal_state(&probe.id)?;
            let due = match state.last_run_at {
                Some(last) => (now - last).num_seconds() >= i64::from(probe.interval_s),
                None => true,
            };
            if !due {
                continue;
            }
            ran += 1;
            if let Err(err) = self.run_probe(&probe, now).await {
                warn!(probe_id = %probe.id, error = %err, "probe run failed");
            }
        }
        Ok(ran)
    }

    /// Run one probe immediately and handle the outcome.
    ///
    /// # Errors
    ///
    /// Returns a store error on persistence failure.
    pub async fn run_probe(&self, probe: &HealthProbe, now: DateTime<Utc>) -> HealthResult<()> {
        let (status, detail) = self.checks.run(&probe.kind).await;
        self.storage.append_sample(&HealthSample {
            probe_id: probe.id.clone(),
            at: now,
            status,
            detail,
        })?;

        let mut state = self.storage.get_heal_state(&probe.id)?;
        state.last_run_at = Some(now);

        match status {
            HealthStatus::Ok => {
                // An ok sample clears the failure streak and the
                // escalation latch.
                state.consecutive_failures = 0;
                state.notified = false;
            }
            HealthStatus::Warn => {
                // Warn neither extends nor clears a failure streak.
            }
            HealthStatus::Fail => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= probe.failure_threshold {
                    self.events.publish(LnmtEvent::ProbeBreached {
                        probe_id: probe.id.clone(),
                        consecutive_failures: state.consecutive_failures,
                    });
                    self.attempt_recovery(probe, &mut state, now).await?;
                }
            }
        }

        self.storage.put_heal_state(&probe.id, &state)?;
        Ok(())
    }

    async fn attempt_recovery(
        &self,
        probe: &HealthProbe,
        state: &mut HealState,
        now: DateTime<Utc>,
    ) -> HealthResult<()> {
        let Some(recovery_job) = &probe.recovery_action else {
            return Ok(());
        };

        let window = Duration::seconds(i64::from(self.policy.window_s));
        state.attempts.retain(|at| now.signed_duration_since(*at) <= window);

        #[allow(clippy::cast_possible_truncation)]
        let attempts_so_far = state.attempts.len() as u32;

        if state.notified {
            // Already escalated: stay quiet, but the suppressed attempt
            // still leaves a log row.
            self.storage.append_heal_log(&SelfHealLogRow {
                at: now,
                module: probe.id.clone(),
                action: recovery_job.to_string(),
                status: "suppressed".to_owned(),
                attempts: attempts_so_far,
                error: None,
                notified: true,
            })?;
            return Ok(());
        }

        if attempts_so_far >= self.policy.max_attempts {
            warn!(probe_id = %probe.id, "self-heal cap exhausted, escalating");
            state.notified = true;
            self.events.publish(LnmtEvent::SelfHealEscalated {
                probe_id: probe.id.clone(),
            });
            self.storage.append_heal_log(&SelfHealLogRow {
                at: now,
                module: probe.id.clone(),
                action: recovery_job.to_string(),
                status: "suppressed".to_owned(),
                attempts: attempts_so_far,
                error: Some("attempt cap exceeded".to_owned()),
                notified: true,
            })?;
            return Ok(());
        }

        state.attempts.push(now);
        let attempt = attempts_so_far + 1;
        let submission = self.recovery.submit(recovery_job).await;
        let submitted = submission.is_ok();

        info!(
            probe_id = %probe.id,
            job_id = %recovery_job,
            attempt,
            submitted,
            "self-heal attempt"
        );
        self.events.publish(LnmtEvent::SelfHealAttempted {
            probe_id: probe.id.clone(),
            attempt,
            submitted,
        });
        self.storage.append_heal_log(&SelfHealLogRow {
            at: now,
            module: probe.id.clone(),
            action: recovery_job.to_string(),
            status: if submitted { "submitted" } else { "failed" }.to_owned(),
            attempts: attempt,
            error: submission.err(),
            notified: false,
        })?;
        Ok(())
    }

    /// Manually clear a probe's failure streak and escalation latch.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::UnknownProbe`] or a store error.
    pub fn reset(&self, probe_id: &ProbeId) -> HealthResult<()> {
        if self.storage.get_probe(probe_id)?.is_none() {
            return Err(HealthError::UnknownProbe {
                probe_id: probe_id.clone(),
            });
        }
        let mut state = self.storage.get_heal_state(probe_id)?;
        state.consecutive_failures = 0;
        state.notified = false;
        state.attempts.clear();
        self.storage.put_heal_state(probe_id, &state)?;
        info!(%probe_id, "heal state reset");
        Ok(())
    }

    /// Status summary across all probes.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn status(&self) -> HealthResult<Vec<ProbeStatusSummary>> {
        let mut summaries = Vec::new();
        for probe in self.storage.list_probes()? {
            let state = self.storage.get_heal_state(&probe.id)?;
            let last_status = self
                .storage
                .samples_for(&probe.id, 1)?
                .first()
                .map(|sample| sample.status);
            #[allow(clippy::cast_possible_truncation)]
            summaries.push(ProbeStatusSummary {
                probe_id: probe.id,
                last_status,
                consecutive_failures: state.consecutive_failures,
                notified: state.notified,
                attempts_in_window: state.attempts.len() as u32,
            });
        }
        Ok(summaries)
    }

    /// The storage handle (read-side access for CLI and API layers).
    #[must_use]
    pub fn storage(&self) -> &HealthStorage {
        &self.storage
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
