//! External collaborators sampled during a poll cycle.
//!
//! The tracker never talks to the network directly; it is handed these
//! traits at construction. Production wires them to counter readers and
//! a raw-socket prober; tests hand in scripted fakes.

use async_trait::async_trait;
use lnmt_core::MacAddr;

/// Cumulative per-device byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficCounters {
    /// Total bytes received by the device.
    pub bytes_in: u64,
    /// Total bytes sent by the device.
    pub bytes_out: u64,
}

/// Source of cumulative traffic counters, keyed by MAC.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Read the device's counters. An `Err` marks this device's sample
    /// inactive without failing the cycle.
    async fn counters(&self, mac: &MacAddr) -> Result<TrafficCounters, String>;
}

/// ICMP (or equivalent) reachability prober.
#[async_trait]
pub trait PingProber: Send + Sync {
    /// Probe `ip`, bounded by `window_s` seconds. `true` on response.
    async fn ping(&self, ip: &str, window_s: u32) -> bool;
}

/// DNS query log keyed by client IP.
#[async_trait]
pub trait DnsQueryLog: Send + Sync {
    /// Hostnames the client queried since the last poll cycle.
    async fn recent_queries(&self, ip: &str) -> Vec<String>;
}

/// No-op collaborators for deployments without the corresponding feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSource;

#[async_trait]
impl TrafficSource for NullSource {
    async fn counters(&self, _mac: &MacAddr) -> Result<TrafficCounters, String> {
        Err("no traffic source configured".to_owned())
    }
}

#[async_trait]
impl PingProber for NullSource {
    async fn ping(&self, _ip: &str, _window_s: u32) -> bool {
        false
    }
}

#[async_trait]
impl DnsQueryLog for NullSource {
    async fn recent_queries(&self, _ip: &str) -> Vec<String> {
        Vec::new()
    }
}
