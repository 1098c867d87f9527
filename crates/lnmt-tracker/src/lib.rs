//! LNMT Tracker - lease ingestion, presence detection, usage sessions.
//!
//! One poll cycle reads the DHCP lease file, reconciles device rows
//! (reservations win over lease drift), samples per-device traffic and
//! ping to derive online/offline state, and opens, extends, classifies,
//! and closes usage sessions. Aggregate VLAN bandwidth is checked against
//! configured thresholds; breaches are published for the QoS tooling
//! downstream.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod lease;
mod sources;
mod storage;
mod tracker;
mod types;

pub use error::{TrackerError, TrackerResult};
pub use lease::{parse_lease_file, parse_lease_line, LeaseParseOutcome};
pub use sources::{DnsQueryLog, NullSource, PingProber, TrafficCounters, TrafficSource};
pub use storage::TrackerStorage;
pub use tracker::{DeviceFilter, DeviceTracker, PollSummary};
pub use types::{
    AppPattern, DetectionSettings, Device, DeviceState, DnsWhitelistPattern, LeaseRecord,
    PresenceSample, Reservation, ThresholdBreach, UsageSession, VlanThreshold,
};
