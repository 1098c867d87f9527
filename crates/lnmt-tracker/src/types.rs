//! Device, lease, presence, session, and policy types.

use chrono::{DateTime, Utc};
use lnmt_core::{MacAddr, VlanId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TrackerError, TrackerResult};

/// A pinned hostname/VLAN assignment that overrides lease drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Operator-chosen stable host id, e.g. `"livingroom-tv"`.
    pub host_id: String,
    /// Hostname the device keeps regardless of what the lease reports.
    pub desired_hostname: String,
    /// VLAN the device is pinned to.
    pub vlan_id: Option<VlanId>,
}

/// An identified host, keyed by canonical MAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Canonical MAC address.
    pub mac: MacAddr,
    /// Current IP address as reported by the latest lease.
    pub ip: String,
    /// Effective hostname (reservation wins over lease).
    pub hostname: String,
    /// VLAN, from reservation or lease context.
    pub vlan_id: Option<VlanId>,
    /// First observation.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation.
    pub last_seen: DateTime<Utc>,
    /// Sticky reservation, if any.
    pub reservation: Option<Reservation>,
}

/// One parsed lease line. An observation, not authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Lease-holder MAC, canonical form.
    pub mac: MacAddr,
    /// Leased IP.
    pub ip: String,
    /// Hostname the client reported.
    pub hostname: String,
    /// Lease expiry (epoch seconds as written in the file).
    pub lease_expiry: i64,
}

/// One presence observation for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSample {
    /// The device.
    pub mac: MacAddr,
    /// When the sample was taken.
    pub observed_at: DateTime<Utc>,
    /// Inbound bytes since the previous sample.
    pub bytes_in_delta: u64,
    /// Outbound bytes since the previous sample.
    pub bytes_out_delta: u64,
    /// Whether a probe got a response within the ping window.
    pub ping_responded: bool,
    /// Derived: whether this sample counts as activity.
    pub active: bool,
}

/// Online-detection thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Seconds within which a ping response counts.
    pub ping_window: u32,
    /// Minimum inbound delta for traffic-based activity.
    pub min_bytes_in: u64,
    /// Minimum outbound delta for traffic-based activity.
    pub min_bytes_out: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            ping_window: 3,
            min_bytes_in: 1024,
            min_bytes_out: 1024,
        }
    }
}

impl DetectionSettings {
    /// The activity rule: a ping response, or both byte deltas at or
    /// above their minima.
    #[must_use]
    pub fn is_active(&self, bytes_in_delta: u64, bytes_out_delta: u64, ping_responded: bool) -> bool {
        ping_responded
            || (bytes_in_delta >= self.min_bytes_in && bytes_out_delta >= self.min_bytes_out)
    }
}

/// Derived per-device tracking state carried between poll cycles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceState {
    /// Whether the device is currently considered online.
    pub online: bool,
    /// Last cumulative counter reading, for delta computation.
    pub prev_counters: Option<(u64, u64)>,
    /// Most recent sample that counted as activity.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Open usage session, if any.
    pub open_session: Option<UsageSession>,
}

/// A bounded online interval for a device on a VLAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSession {
    /// Session id.
    pub id: Uuid,
    /// VLAN snapshot at open.
    pub vlan_id: Option<VlanId>,
    /// Device MAC.
    pub mac: MacAddr,
    /// IP snapshot at open.
    pub ip: String,
    /// Hostname snapshot at open.
    pub hostname: String,
    /// Classified application category, when a pattern matched.
    pub app_category: Option<String>,
    /// When the session opened. `None` only for rows migrated from the
    /// legacy schema that never recorded timestamps.
    pub started_at: Option<DateTime<Utc>>,
    /// When the session closed; open sessions have `None`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds of actual activity (active sample intervals only).
    pub seconds_used: i64,
}

/// Per-VLAN bandwidth and session policy. All fields must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanThreshold {
    /// The VLAN.
    pub vlan_id: VlanId,
    /// Aggregate bandwidth limit over the trailing window.
    pub threshold_kbps: u64,
    /// Trailing window length, also the session idle cutoff.
    pub time_window_secs: u32,
    /// Maximum accumulated seconds before a session is closed.
    pub session_limit_secs: u32,
}

impl VlanThreshold {
    /// Enforce the all-positive invariant.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidThreshold`] naming the zero field.
    pub fn validate(&self) -> TrackerResult<()> {
        let offending = if self.threshold_kbps == 0 {
            Some("threshold_kbps")
        } else if self.time_window_secs == 0 {
            Some("time_window_secs")
        } else if self.session_limit_secs == 0 {
            Some("session_limit_secs")
        } else {
            None
        };
        match offending {
            Some(field) => Err(TrackerError::InvalidThreshold {
                vlan_id: self.vlan_id.0,
                detail: format!("{field} must be > 0"),
            }),
            None => Ok(()),
        }
    }
}

/// An application classification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPattern {
    /// Rule id; rules apply in ascending id order.
    pub id: u32,
    /// Regex matched against DNS query hostnames.
    pub pattern: String,
    /// Category assigned on match.
    pub category: String,
}

/// A DNS whitelist entry. Matching queries are excluded from usage
/// attribution entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsWhitelistPattern {
    /// Entry id.
    pub id: u32,
    /// Regex matched against DNS query hostnames.
    pub pattern: String,
}

/// A recorded VLAN bandwidth breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdBreach {
    /// The VLAN.
    pub vlan_id: VlanId,
    /// Observed aggregate kbps.
    pub observed_kbps: u64,
    /// Configured limit.
    pub threshold_kbps: u64,
    /// When the breach was observed.
    pub at: DateTime<Utc>,
}
