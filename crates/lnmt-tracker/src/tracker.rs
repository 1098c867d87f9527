//! The poll cycle: reconcile leases, sample presence, correlate sessions.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use lnmt_core::{MacAddr, VlanId};
use lnmt_events::{EventBus, LnmtEvent};
use lnmt_store::{AuditEvent, AuditLog};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TrackerError, TrackerResult};
use crate::lease::parse_lease_file;
use crate::sources::{DnsQueryLog, PingProber, TrafficSource};
use crate::storage::TrackerStorage;
use crate::types::{
    DetectionSettings, Device, DeviceState, PresenceSample, Reservation, ThresholdBreach,
    UsageSession, VlanThreshold,
};

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Leases observed this cycle.
    pub devices_seen: usize,
    /// Devices created this cycle.
    pub new_devices: usize,
    /// Usage sessions opened.
    pub sessions_opened: usize,
    /// Usage sessions closed.
    pub sessions_closed: usize,
}

/// Read-side device filter.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Only devices on this VLAN.
    pub vlan_id: Option<VlanId>,
    /// Only devices whose hostname contains this substring.
    pub hostname_contains: Option<String>,
    /// Only devices currently online (or offline).
    pub online: Option<bool>,
}

/// The device tracker and session correlator.
pub struct DeviceTracker {
    storage: TrackerStorage,
    audit: AuditLog,
    events: EventBus,
    settings: DetectionSettings,
    lease_file: PathBuf,
    poll_interval_s: u32,
    traffic: Arc<dyn TrafficSource>,
    ping: Arc<dyn PingProber>,
    dns: Arc<dyn DnsQueryLog>,
    /// Trailing per-VLAN byte windows for threshold checks. Purely
    /// derived; rebuilt from scratch after a restart.
    vlan_windows: Mutex<HashMap<u16, VecDeque<(DateTime<Utc>, u64)>>>,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

impl DeviceTracker {
    /// Create a tracker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: TrackerStorage,
        audit: AuditLog,
        events: EventBus,
        settings: DetectionSettings,
        lease_file: impl Into<PathBuf>,
        poll_interval_s: u32,
        traffic: Arc<dyn TrafficSource>,
        ping: Arc<dyn PingProber>,
        dns: Arc<dyn DnsQueryLog>,
    ) -> Self {
        Self {
            storage,
            audit,
            events,
            settings,
            lease_file: lease_file.into(),
            poll_interval_s: poll_interval_s.max(1),
            traffic,
            ping,
            dns,
            vlan_windows: Mutex::new(HashMap::new()),
            last_poll: Mutex::new(None),
        }
    }

    // -- poll cycle ---------------------------------------------------------

    /// Run one full cycle: read leases, reconcile devices, sample
    /// presence, update sessions, check VLAN thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::LeaseFile`] when the lease file cannot be
    /// read; in that case no device state is touched. Per-device sampling
    /// failures are isolated and never fail the cycle.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> TrackerResult<PollSummary> {
        let text = tokio::fs::read_to_string(&self.lease_file)
            .await
            .map_err(|e| TrackerError::LeaseFile {
                path: self.lease_file.display().to_string(),
                detail: e.to_string(),
            })?;

        let mut summary = PollSummary::default();
        let outcome = parse_lease_file(&text);
        for (line_number, content) in &outcome.malformed {
            warn!(line = line_number, "skipping malformed lease line");
            self.record(
                "system",
                "lease_skip",
                &format!("line {line_number}"),
                false,
                content.clone(),
            );
        }

        summary.devices_seen = outcome.leases.len();
        for lease in &outcome.leases {
            if self.reconcile_lease(lease, now)? {
                summary.new_devices += 1;
            }
        }

        let interval = self.interval_since_last_poll(now);
        for device in self.storage.list_devices()? {
            match self.sample_device(&device, now, interval, &mut summary).await {
                Ok(()) => {}
                Err(err) => {
                    // Partial failure: this device's sample is lost, the
                    // cycle proceeds.
                    warn!(mac = %device.mac, error = %err, "device sample failed");
                }
            }
        }

        self.check_vlan_thresholds(now)?;

        *lock(&self.last_poll) = Some(now);
        debug!(
            devices_seen = summary.devices_seen,
            opened = summary.sessions_opened,
            closed = summary.sessions_closed,
            "poll cycle complete"
        );
        Ok(summary)
    }

    /// Returns whether the lease created a new device.
    fn reconcile_lease(&self, lease: &crate::types::LeaseRecord, now: DateTime<Utc>) -> TrackerResult<bool> {
        match self.storage.get_device(&lease.mac)? {
            None => {
                let device = Device {
                    mac: lease.mac,
                    ip: lease.ip.clone(),
                    hostname: lease.hostname.clone(),
                    vlan_id: None,
                    first_seen: now,
                    last_seen: now,
                    reservation: None,
                };
                info!(mac = %device.mac, hostname = %device.hostname, "new device");
                self.storage.put_device(&device)?;
                Ok(true)
            }
            Some(mut device) => {
                device.ip = lease.ip.clone();
                device.last_seen = now;
                // Reservations are sticky: lease hostname drift never
                // overwrites a reserved name or VLAN.
                if let Some(reservation) = &device.reservation {
                    device.hostname = reservation.desired_hostname.clone();
                    if reservation.vlan_id.is_some() {
                        device.vlan_id = reservation.vlan_id;
                    }
                } else {
                    device.hostname = lease.hostname.clone();
                }
                self.storage.put_device(&device)?;
                Ok(false)
            }
        }
    }

    async fn sample_device(
        &self,
        device: &Device,
        now: DateTime<Utc>,
        interval: Duration,
        summary: &mut PollSummary,
    ) -> TrackerResult<()> {
        let mut state = self.storage.get_state(&device.mac)?;

        let (bytes_in_delta, bytes_out_delta, ping_responded, counter_ok) =
            match self.traffic.counters(&device.mac).await {
                Ok(counters) => {
                    let (in_delta, out_delta) = match state.prev_counters {
                        Some((prev_in, prev_out)) => (
                            counters.bytes_in.saturating_sub(prev_in),
                            counters.bytes_out.saturating_sub(prev_out),
                        ),
                        None => (0, 0),
                    };
                    state.prev_counters = Some((counters.bytes_in, counters.bytes_out));
                    let ping = self
                        .ping
                        .ping(&device.ip, self.settings.ping_window)
                        .await;
                    (in_delta, out_delta, ping, true)
                }
                Err(err) => {
                    debug!(mac = %device.mac, error = %err, "counter read failed");
                    (0, 0, false, false)
                }
            };

        let active = counter_ok
            && self
                .settings
                .is_active(bytes_in_delta, bytes_out_delta, ping_responded);

        self.storage.append_sample(&PresenceSample {
            mac: device.mac,
            observed_at: now,
            bytes_in_delta,
            bytes_out_delta,
            ping_responded,
            active,
        })?;

        self.push_vlan_bytes(device.vlan_id, now, bytes_in_delta.saturating_add(bytes_out_delta));

        let threshold = match device.vlan_id {
            Some(vlan_id) => self.storage.get_threshold(vlan_id)?,
            None => None,
        };

        if active {
            // Accumulate before the transition check: only intervals
            // spent inside an already-open session count.
            if state.online {
                if let Some(session) = &mut state.open_session {
                    session.seconds_used += interval.num_seconds().max(0);
                }
            } else {
                state.online = true;
                self.events.publish(LnmtEvent::DeviceOnline {
                    mac: device.mac,
                    vlan_id: device.vlan_id,
                });
                state.open_session = Some(UsageSession {
                    id: Uuid::new_v4(),
                    vlan_id: device.vlan_id,
                    mac: device.mac,
                    ip: device.ip.clone(),
                    hostname: device.hostname.clone(),
                    app_category: None,
                    started_at: Some(now),
                    ended_at: None,
                    seconds_used: 0,
                });
                summary.sessions_opened += 1;
                debug!(mac = %device.mac, "session opened");
            }
            state.last_active_at = Some(now);

            self.classify_session(&mut state, &device.ip).await?;
        }

        // Session limit and idle-window closes apply even while online.
        let should_close = match (&state.open_session, threshold) {
            (Some(session), Some(threshold)) => {
                let over_limit =
                    session.seconds_used >= i64::from(threshold.session_limit_secs);
                let idle_too_long = state.last_active_at.is_some_and(|last_active| {
                    (now - last_active).num_seconds() > i64::from(threshold.time_window_secs)
                });
                over_limit || idle_too_long
            }
            _ => false,
        };
        if should_close {
            self.close_session(&mut state, now)?;
            summary.sessions_closed += 1;
        }

        if !active && state.online {
            // One full interval without activity: offline, session ends.
            state.online = false;
            self.events.publish(LnmtEvent::DeviceOffline { mac: device.mac });
            if state.open_session.is_some() {
                self.close_session(&mut state, now)?;
                summary.sessions_closed += 1;
            }
            debug!(mac = %device.mac, "device offline");
        }

        self.storage.put_state(&device.mac, &state)?;
        Ok(())
    }

    async fn classify_session(&self, state: &mut DeviceState, ip: &str) -> TrackerResult<()> {
        let Some(session) = &mut state.open_session else {
            return Ok(());
        };
        if session.app_category.is_some() {
            return Ok(());
        }

        let queries = self.dns.recent_queries(ip).await;
        if queries.is_empty() {
            return Ok(());
        }

        let whitelist = compile_patterns(
            self.storage
                .list_dns_whitelist()?
                .iter()
                .map(|entry| entry.pattern.as_str()),
        );
        let rules: Vec<(Regex, String)> = self
            .storage
            .list_app_patterns()?
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Some((regex, rule.category)),
                Err(err) => {
                    warn!(pattern = %rule.pattern, error = %err, "bad app pattern skipped");
                    None
                }
            })
            .collect();

        for query in queries {
            if whitelist.iter().any(|regex| regex.is_match(&query)) {
                continue;
            }
            if let Some((_, category)) = rules.iter().find(|(regex, _)| regex.is_match(&query)) {
                session.app_category = Some(category.clone());
                debug!(mac = %session.mac, category = %category, "session classified");
                break;
            }
        }
        Ok(())
    }

    fn close_session(&self, state: &mut DeviceState, now: DateTime<Utc>) -> TrackerResult<()> {
        if let Some(mut session) = state.open_session.take() {
            session.ended_at = Some(now);
            self.storage.append_session(&session)?;
            self.events.publish(LnmtEvent::SessionClosed {
                mac: session.mac,
                seconds_used: session.seconds_used,
            });
            debug!(mac = %session.mac, seconds = session.seconds_used, "session closed");
        }
        Ok(())
    }

    fn push_vlan_bytes(&self, vlan_id: Option<VlanId>, now: DateTime<Utc>, bytes: u64) {
        if let Some(vlan_id) = vlan_id {
            lock(&self.vlan_windows)
                .entry(vlan_id.0)
                .or_default()
                .push_back((now, bytes));
        }
    }

    fn check_vlan_thresholds(&self, now: DateTime<Utc>) -> TrackerResult<()> {
        for threshold in self.storage.list_thresholds()? {
            let window = Duration::seconds(i64::from(threshold.time_window_secs));
            let total_bytes: u64 = {
                let mut windows = lock(&self.vlan_windows);
                let Some(entries) = windows.get_mut(&threshold.vlan_id.0) else {
                    continue;
                };
                while entries
                    .front()
                    .is_some_and(|(at, _)| now.signed_duration_since(*at) > window)
                {
                    entries.pop_front();
                }
                entries.iter().map(|(_, bytes)| *bytes).sum()
            };

            let observed_kbps =
                total_bytes.saturating_mul(8) / 1000 / u64::from(threshold.time_window_secs).max(1);
            if observed_kbps > threshold.threshold_kbps {
                warn!(
                    vlan = threshold.vlan_id.0,
                    observed_kbps, limit = threshold.threshold_kbps, "vlan threshold breach"
                );
                let breach = ThresholdBreach {
                    vlan_id: threshold.vlan_id,
                    observed_kbps,
                    threshold_kbps: threshold.threshold_kbps,
                    at: now,
                };
                self.storage.append_breach(&breach)?;
                self.events.publish(LnmtEvent::VlanThresholdBreach {
                    vlan_id: threshold.vlan_id,
                    observed_kbps,
                    threshold_kbps: threshold.threshold_kbps,
                    at: now,
                });
            }
        }
        Ok(())
    }

    fn interval_since_last_poll(&self, now: DateTime<Utc>) -> Duration {
        match *lock(&self.last_poll) {
            Some(last) if now > last => now - last,
            _ => Duration::seconds(i64::from(self.poll_interval_s)),
        }
    }

    // -- operator surface ---------------------------------------------------

    /// Devices matching `filter`, sorted by MAC.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn list_devices(&self, filter: &DeviceFilter) -> TrackerResult<Vec<Device>> {
        let mut devices = Vec::new();
        for device in self.storage.list_devices()? {
            if let Some(vlan_id) = filter.vlan_id {
                if device.vlan_id != Some(vlan_id) {
                    continue;
                }
            }
            if let Some(needle) = &filter.hostname_contains {
                if !device
                    .hostname
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
                {
                    continue;
                }
            }
            if let Some(online) = filter.online {
                if self.storage.get_state(&device.mac)?.online != online {
                    continue;
                }
            }
            devices.push(device);
        }
        Ok(devices)
    }

    /// Presence and session history for one device, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::UnknownDevice`] for an unknown MAC.
    pub fn history(
        &self,
        mac: &MacAddr,
        limit: usize,
    ) -> TrackerResult<(Vec<PresenceSample>, Vec<UsageSession>)> {
        if self.storage.get_device(mac)?.is_none() {
            return Err(TrackerError::UnknownDevice {
                mac: mac.to_string(),
            });
        }
        Ok((
            self.storage.samples_for(mac, limit)?,
            self.storage.sessions_for(mac, limit)?,
        ))
    }

    /// Recent VLAN threshold breaches, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn alerts(&self, limit: usize) -> TrackerResult<Vec<ThresholdBreach>> {
        Ok(self.storage.list_breaches(limit)?)
    }

    /// Pin (or clear) a reservation for a device, creating the device row
    /// if the MAC has never been seen.
    ///
    /// # Errors
    ///
    /// Returns a store error on persistence failure.
    pub fn set_reservation(
        &self,
        actor: &str,
        mac: &MacAddr,
        reservation: Option<Reservation>,
    ) -> TrackerResult<()> {
        let now = Utc::now();
        let mut device = self.storage.get_device(mac)?.unwrap_or(Device {
            mac: *mac,
            ip: String::new(),
            hostname: String::new(),
            vlan_id: None,
            first_seen: now,
            last_seen: now,
            reservation: None,
        });
        if let Some(reservation) = &reservation {
            device.hostname = reservation.desired_hostname.clone();
            if reservation.vlan_id.is_some() {
                device.vlan_id = reservation.vlan_id;
            }
        }
        device.reservation = reservation;
        self.storage.put_device(&device)?;
        self.record(actor, "reservation_set", &mac.to_string(), true, "");
        Ok(())
    }

    /// Create or update a VLAN threshold. Changes are audited with
    /// before/after images.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidThreshold`] or a store error.
    pub fn set_threshold(&self, actor: &str, threshold: VlanThreshold) -> TrackerResult<()> {
        threshold.validate()?;
        self.storage.put_threshold(actor, &threshold)?;
        self.record(
            actor,
            "vlan_threshold_set",
            &threshold.vlan_id.to_string(),
            true,
            format!(
                "kbps={} window={} session_limit={}",
                threshold.threshold_kbps, threshold.time_window_secs, threshold.session_limit_secs
            ),
        );
        Ok(())
    }

    /// Whether a device is currently online.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn is_online(&self, mac: &MacAddr) -> TrackerResult<bool> {
        Ok(self.storage.get_state(mac)?.online)
    }

    /// The storage handle (read-side access for CLI and API layers).
    #[must_use]
    pub fn storage(&self) -> &TrackerStorage {
        &self.storage
    }

    fn record(&self, actor: &str, action: &str, target: &str, success: bool, details: impl Into<String>) {
        let event = AuditEvent::now(actor, action, target, success, details);
        if let Err(err) = self.audit.record(&event) {
            warn!(action, error = %err, "audit write failed");
        }
    }
}

impl std::fmt::Debug for DeviceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTracker")
            .field("lease_file", &self.lease_file)
            .field("poll_interval_s", &self.poll_interval_s)
            .finish_non_exhaustive()
    }
}

fn compile_patterns<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<Regex> {
    patterns
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(%pattern, error = %err, "bad whitelist pattern skipped");
                None
            }
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests;
