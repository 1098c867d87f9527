//! Event vocabulary published on the bus.

use chrono::{DateTime, Utc};
use lnmt_core::{JobId, MacAddr, ProbeId, RunId, VlanId};
use serde::{Deserialize, Serialize};

/// An event emitted by an LNMT subsystem.
///
/// Events are observations, not commands: consumers must tolerate missing
/// or duplicated events and reconcile against the store when exactness
/// matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LnmtEvent {
    /// The scheduler loop started ticking.
    SchedulerStarted {
        /// Worker pool size.
        workers: usize,
    },

    /// The scheduler drained and stopped.
    SchedulerStopped {
        /// Runs cancelled during drain.
        cancelled_runs: usize,
    },

    /// A job run reached a terminal or retrying state.
    JobRunFinished {
        /// Job the run belongs to.
        job_id: JobId,
        /// The run.
        run_id: RunId,
        /// Terminal status as a stable string (`completed`, `failed`, ...).
        status: String,
    },

    /// A device transitioned to online.
    DeviceOnline {
        /// Device MAC.
        mac: MacAddr,
        /// VLAN the device sits on, when known.
        vlan_id: Option<VlanId>,
    },

    /// A device transitioned to offline.
    DeviceOffline {
        /// Device MAC.
        mac: MacAddr,
    },

    /// A usage session was opened.
    SessionOpened {
        /// Device MAC.
        mac: MacAddr,
        /// VLAN snapshot at open.
        vlan_id: Option<VlanId>,
    },

    /// A usage session was closed.
    SessionClosed {
        /// Device MAC.
        mac: MacAddr,
        /// Accumulated active seconds.
        seconds_used: i64,
    },

    /// A VLAN's aggregate bandwidth exceeded its configured threshold.
    VlanThresholdBreach {
        /// The VLAN.
        vlan_id: VlanId,
        /// Observed kbps over the trailing window.
        observed_kbps: u64,
        /// Configured limit.
        threshold_kbps: u64,
        /// When the breach was observed.
        at: DateTime<Utc>,
    },

    /// A probe accumulated enough consecutive failures to breach.
    ProbeBreached {
        /// The probe.
        probe_id: ProbeId,
        /// Consecutive failures at breach time.
        consecutive_failures: u32,
    },

    /// A self-heal recovery attempt was submitted.
    SelfHealAttempted {
        /// The probe being healed.
        probe_id: ProbeId,
        /// Attempt ordinal within the current window.
        attempt: u32,
        /// Whether the recovery submission succeeded.
        submitted: bool,
    },

    /// A probe exhausted its heal budget and was escalated.
    SelfHealEscalated {
        /// The probe.
        probe_id: ProbeId,
    },

    /// An account was locked out after repeated failures.
    UserLockedOut {
        /// The username (usernames are not secret; tokens and passwords are).
        username: String,
        /// Lockout expiry.
        until: DateTime<Utc>,
    },
}

impl LnmtEvent {
    /// Stable lowercase name of the event variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SchedulerStarted { .. } => "scheduler_started",
            Self::SchedulerStopped { .. } => "scheduler_stopped",
            Self::JobRunFinished { .. } => "job_run_finished",
            Self::DeviceOnline { .. } => "device_online",
            Self::DeviceOffline { .. } => "device_offline",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
            Self::VlanThresholdBreach { .. } => "vlan_threshold_breach",
            Self::ProbeBreached { .. } => "probe_breached",
            Self::SelfHealAttempted { .. } => "self_heal_attempted",
            Self::SelfHealEscalated { .. } => "self_heal_escalated",
            Self::UserLockedOut { .. } => "user_locked_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = LnmtEvent::DeviceOffline {
            mac: "aa:bb:cc:dd:ee:01".parse().unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }
}
