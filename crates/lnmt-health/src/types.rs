//! Probe configuration and observation types.

use chrono::{DateTime, Utc};
use lnmt_core::{JobId, ProbeId};
use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};

/// What a probe checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// A process with this name exists and is running.
    Process {
        /// Process name as it appears in `/proc/<pid>/comm`.
        name: String,
    },
    /// TCP connect succeeds within a 2s deadline.
    Port {
        /// `host:port` to connect to.
        addr: String,
    },
    /// HTTP GET returns 2xx within 5s.
    Http {
        /// URL to fetch.
        url: String,
    },
    /// Filesystem usage stays below a percentage.
    Disk {
        /// Mount point to check.
        path: String,
        /// Maximum used percentage (0-100).
        max_used_percent: u8,
    },
    /// A user-registered check function.
    Custom {
        /// Name in the custom check registry.
        name: String,
    },
}

/// A configured health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    /// Stable probe id.
    pub id: ProbeId,
    /// What to check.
    #[serde(flatten)]
    pub kind: ProbeKind,
    /// Seconds between checks.
    pub interval_s: u32,
    /// Consecutive failures before the recovery action fires.
    pub failure_threshold: u32,
    /// Scheduler job submitted on breach, if any.
    pub recovery_action: Option<JobId>,
}

impl HealthProbe {
    /// Enforce configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::InvalidProbe`] naming the violated rule.
    pub fn validate(&self) -> HealthResult<()> {
        if self.interval_s == 0 {
            return Err(HealthError::InvalidProbe {
                probe_id: self.id.clone(),
                detail: "interval_s must be > 0".to_owned(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(HealthError::InvalidProbe {
                probe_id: self.id.clone(),
                detail: "failure_threshold must be > 0".to_owned(),
            });
        }
        if let ProbeKind::Disk { max_used_percent, .. } = &self.kind {
            if *max_used_percent > 100 {
                return Err(HealthError::InvalidProbe {
                    probe_id: self.id.clone(),
                    detail: "max_used_percent must be <= 100".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Result of one probe check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Healthy.
    Ok,
    /// Degraded but not failing.
    Warn,
    /// Failing.
    Fail,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Warn => f.write_str("warn"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// One recorded probe observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    /// The probe.
    pub probe_id: ProbeId,
    /// When the check ran.
    pub at: DateTime<Utc>,
    /// Outcome.
    pub status: HealthStatus,
    /// Human-readable detail.
    pub detail: String,
}

/// One self-heal log row. Every recovery attempt writes exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealLogRow {
    /// When the attempt was made.
    pub at: DateTime<Utc>,
    /// The probe being healed.
    pub module: ProbeId,
    /// The recovery job submitted.
    pub action: String,
    /// Submission outcome (`submitted`, `failed`, `suppressed`).
    pub status: String,
    /// Attempt ordinal within the current window.
    pub attempts: u32,
    /// Error text for failed submissions.
    pub error: Option<String>,
    /// Whether the probe was in (or entered) the NOTIFIED state.
    pub notified: bool,
}

/// Per-probe self-heal bookkeeping carried between sweeps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealState {
    /// Consecutive `fail` samples.
    pub consecutive_failures: u32,
    /// Recovery attempts inside the current window.
    pub attempts: Vec<DateTime<Utc>>,
    /// Escalated: attempts suppressed until reset or an `ok` sample.
    pub notified: bool,
    /// When the probe last ran.
    pub last_run_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(kind: ProbeKind) -> HealthProbe {
        HealthProbe {
            id: ProbeId::new("p"),
            kind,
            interval_s: 30,
            failure_threshold: 3,
            recovery_action: None,
        }
    }

    #[test]
    fn test_validation() {
        assert!(probe(ProbeKind::Port {
            addr: "127.0.0.1:53".to_owned()
        })
        .validate()
        .is_ok());

        let mut zero_interval = probe(ProbeKind::Process {
            name: "dnsmasq".to_owned(),
        });
        zero_interval.interval_s = 0;
        assert!(zero_interval.validate().is_err());

        let silly_disk = probe(ProbeKind::Disk {
            path: "/".to_owned(),
            max_used_percent: 150,
        });
        assert!(silly_disk.validate().is_err());
    }

    #[test]
    fn test_probe_kind_serde_shape() {
        let probe = probe(ProbeKind::Http {
            url: "http://127.0.0.1:8080/healthz".to_owned(),
        });
        let json = serde_json::to_value(&probe).unwrap();
        assert_eq!(json["kind"], "http");
        assert_eq!(json["url"], "http://127.0.0.1:8080/healthz");
        let back: HealthProbe = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, probe.kind);
    }
}
