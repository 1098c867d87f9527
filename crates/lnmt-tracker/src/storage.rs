//! Typed tracker storage over the key-value store.
//!
//! Devices and policies live in the configuration tier; presence samples
//! and closed usage sessions are append-heavy and ride the operational
//! tier. Open sessions travel inside the per-device state and only land
//! in the session namespace when they close.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lnmt_core::{MacAddr, VlanId};
use lnmt_store::{KvStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};

use crate::types::{
    AppPattern, Device, DeviceState, DnsWhitelistPattern, PresenceSample, ThresholdBreach,
    UsageSession, VlanThreshold,
};

const NS_DEVICES: &str = "tracker:devices";
const NS_STATE: &str = "tracker:presence_state";
const NS_SAMPLES: &str = "tracker:presence";
const NS_SESSIONS: &str = "tracker:sessions";
const NS_THRESHOLDS: &str = "tracker:thresholds";
const NS_APP_PATTERNS: &str = "tracker:app_patterns";
const NS_DNS_WHITELIST: &str = "tracker:dns_whitelist";
const NS_BREACHES: &str = "tracker:breaches";
const NS_THRESHOLD_AUDIT: &str = "audit:vlan_thresholds";

/// One row of the VLAN threshold audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ThresholdAuditRow {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub vlan_id: VlanId,
    pub before: Option<VlanThreshold>,
    pub after: Option<VlanThreshold>,
}

/// Tracker rows in the store.
#[derive(Clone)]
pub struct TrackerStorage {
    store: Arc<dyn KvStore>,
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn time_key(at: DateTime<Utc>, suffix: &str) -> String {
    format!("{:020}:{suffix}", at.timestamp_micros().max(0))
}

impl TrackerStorage {
    /// Create storage over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // -- devices ------------------------------------------------------------

    /// Fetch a device row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn get_device(&self, mac: &MacAddr) -> StoreResult<Option<Device>> {
        match self.store.get(NS_DEVICES, &mac.to_string())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert or update a device row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_device(&self, device: &Device) -> StoreResult<()> {
        self.store
            .set(NS_DEVICES, &device.mac.to_string(), encode(device)?)
    }

    /// All device rows, sorted by MAC.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let mut devices = Vec::new();
        for key in self.store.list_keys(NS_DEVICES)? {
            if let Some(raw) = self.store.get(NS_DEVICES, &key)? {
                devices.push(decode(&raw)?);
            }
        }
        Ok(devices)
    }

    // -- per-device state ---------------------------------------------------

    /// Fetch tracking state for a device, defaulting to fresh state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn get_state(&self, mac: &MacAddr) -> StoreResult<DeviceState> {
        match self.store.get(NS_STATE, &mac.to_string())? {
            Some(raw) => decode(&raw),
            None => Ok(DeviceState::default()),
        }
    }

    /// Persist tracking state for a device.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_state(&self, mac: &MacAddr, state: &DeviceState) -> StoreResult<()> {
        self.store.set(NS_STATE, &mac.to_string(), encode(state)?)
    }

    // -- presence samples ---------------------------------------------------

    /// Append a presence sample.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn append_sample(&self, sample: &PresenceSample) -> StoreResult<()> {
        let key = time_key(sample.observed_at, &sample.mac.to_string());
        self.store.set(NS_SAMPLES, &key, encode(sample)?)
    }

    /// Recent samples for a device, newest first. `limit` zero = all.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn samples_for(&self, mac: &MacAddr, limit: usize) -> StoreResult<Vec<PresenceSample>> {
        let mac_suffix = format!(":{mac}");
        let mut keys = self.store.list_keys(NS_SAMPLES)?;
        keys.reverse();

        let mut samples = Vec::new();
        for key in keys {
            if !key.ends_with(&mac_suffix) {
                continue;
            }
            if let Some(raw) = self.store.get(NS_SAMPLES, &key)? {
                samples.push(decode(&raw)?);
                if limit > 0 && samples.len() >= limit {
                    break;
                }
            }
        }
        Ok(samples)
    }

    // -- usage sessions -----------------------------------------------------

    /// Persist a closed usage session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn append_session(&self, session: &UsageSession) -> StoreResult<()> {
        let anchor = session
            .started_at
            .or(session.ended_at)
            .unwrap_or_else(Utc::now);
        let key = time_key(anchor, &session.id.to_string());
        self.store.set(NS_SESSIONS, &key, encode(session)?)
    }

    /// Closed sessions for a device, newest first. `limit` zero = all.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn sessions_for(&self, mac: &MacAddr, limit: usize) -> StoreResult<Vec<UsageSession>> {
        let mut keys = self.store.list_keys(NS_SESSIONS)?;
        keys.reverse();

        let mut sessions = Vec::new();
        for key in keys {
            let Some(raw) = self.store.get(NS_SESSIONS, &key)? else {
                continue;
            };
            let session: UsageSession = decode(&raw)?;
            if &session.mac != mac {
                continue;
            }
            sessions.push(session);
            if limit > 0 && sessions.len() >= limit {
                break;
            }
        }
        Ok(sessions)
    }

    // -- policies -----------------------------------------------------------

    /// Fetch the threshold for a VLAN.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn get_threshold(&self, vlan_id: VlanId) -> StoreResult<Option<VlanThreshold>> {
        match self.store.get(NS_THRESHOLDS, &vlan_id.to_string())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a threshold and its audit row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_threshold(&self, actor: &str, threshold: &VlanThreshold) -> StoreResult<()> {
        let before = self.get_threshold(threshold.vlan_id)?;
        self.store.set(
            NS_THRESHOLDS,
            &threshold.vlan_id.to_string(),
            encode(threshold)?,
        )?;
        self.append_threshold_audit(&ThresholdAuditRow {
            at: Utc::now(),
            actor: actor.to_owned(),
            vlan_id: threshold.vlan_id,
            before,
            after: Some(*threshold),
        })
    }

    /// All thresholds.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_thresholds(&self) -> StoreResult<Vec<VlanThreshold>> {
        let mut thresholds = Vec::new();
        for key in self.store.list_keys(NS_THRESHOLDS)? {
            if let Some(raw) = self.store.get(NS_THRESHOLDS, &key)? {
                thresholds.push(decode(&raw)?);
            }
        }
        Ok(thresholds)
    }

    fn append_threshold_audit(&self, row: &ThresholdAuditRow) -> StoreResult<()> {
        let key = time_key(row.at, &row.vlan_id.to_string());
        self.store.set(NS_THRESHOLD_AUDIT, &key, encode(row)?)
    }

    /// Threshold audit rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub(crate) fn threshold_audit(&self) -> StoreResult<Vec<ThresholdAuditRow>> {
        let mut keys = self.store.list_keys(NS_THRESHOLD_AUDIT)?;
        keys.reverse();
        let mut rows = Vec::new();
        for key in keys {
            if let Some(raw) = self.store.get(NS_THRESHOLD_AUDIT, &key)? {
                rows.push(decode(&raw)?);
            }
        }
        Ok(rows)
    }

    /// Classification rules in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_app_patterns(&self) -> StoreResult<Vec<AppPattern>> {
        let mut patterns = Vec::new();
        for key in self.store.list_keys(NS_APP_PATTERNS)? {
            if let Some(raw) = self.store.get(NS_APP_PATTERNS, &key)? {
                patterns.push(decode(&raw)?);
            }
        }
        Ok(patterns)
    }

    /// Insert or update a classification rule.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_app_pattern(&self, pattern: &AppPattern) -> StoreResult<()> {
        // Zero-padded keys keep the stable ascending id order.
        let key = format!("{:010}", pattern.id);
        self.store.set(NS_APP_PATTERNS, &key, encode(pattern)?)
    }

    /// DNS whitelist entries.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_dns_whitelist(&self) -> StoreResult<Vec<DnsWhitelistPattern>> {
        let mut entries = Vec::new();
        for key in self.store.list_keys(NS_DNS_WHITELIST)? {
            if let Some(raw) = self.store.get(NS_DNS_WHITELIST, &key)? {
                entries.push(decode(&raw)?);
            }
        }
        Ok(entries)
    }

    /// Insert or update a DNS whitelist entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_dns_whitelist(&self, entry: &DnsWhitelistPattern) -> StoreResult<()> {
        let key = format!("{:010}", entry.id);
        self.store.set(NS_DNS_WHITELIST, &key, encode(entry)?)
    }

    // -- breaches -----------------------------------------------------------

    /// Record a VLAN bandwidth breach.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn append_breach(&self, breach: &ThresholdBreach) -> StoreResult<()> {
        let key = time_key(breach.at, &breach.vlan_id.to_string());
        self.store.set(NS_BREACHES, &key, encode(breach)?)
    }

    /// Recent breaches, newest first. `limit` zero = all.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_breaches(&self, limit: usize) -> StoreResult<Vec<ThresholdBreach>> {
        let mut keys = self.store.list_keys(NS_BREACHES)?;
        keys.reverse();
        let mut breaches = Vec::new();
        for key in keys {
            if let Some(raw) = self.store.get(NS_BREACHES, &key)? {
                breaches.push(decode(&raw)?);
                if limit > 0 && breaches.len() >= limit {
                    break;
                }
            }
        }
        Ok(breaches)
    }
}

impl std::fmt::Debug for TrackerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnmt_store::MemoryKvStore;

    fn storage() -> TrackerStorage {
        TrackerStorage::new(Arc::new(MemoryKvStore::new()))
    }

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_device_roundtrip() {
        let storage = storage();
        let device = Device {
            mac: mac("aa:bb:cc:dd:ee:01"),
            ip: "192.168.1.55".to_owned(),
            hostname: "tv".to_owned(),
            vlan_id: Some(VlanId(10)),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            reservation: None,
        };
        storage.put_device(&device).unwrap();
        let back = storage.get_device(&device.mac).unwrap().unwrap();
        assert_eq!(back.hostname, "tv");
        assert_eq!(storage.list_devices().unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_write_is_audited_with_before_after() {
        let storage = storage();
        let first = VlanThreshold {
            vlan_id: VlanId(10),
            threshold_kbps: 5000,
            time_window_secs: 300,
            session_limit_secs: 3600,
        };
        storage.put_threshold("alice", &first).unwrap();

        let second = VlanThreshold {
            threshold_kbps: 8000,
            ..first
        };
        storage.put_threshold("bob", &second).unwrap();

        let audit = storage.threshold_audit().unwrap();
        assert_eq!(audit.len(), 2);
        // Newest first: bob's change carries the before image.
        assert_eq!(audit[0].actor, "bob");
        assert_eq!(audit[0].before.unwrap().threshold_kbps, 5000);
        assert_eq!(audit[0].after.unwrap().threshold_kbps, 8000);
        assert!(audit[1].before.is_none());
    }

    #[test]
    fn test_app_patterns_keep_id_order() {
        let storage = storage();
        for (id, category) in [(20, "video"), (3, "social"), (100, "gaming")] {
            storage
                .put_app_pattern(&AppPattern {
                    id,
                    pattern: format!("{category}.*"),
                    category: category.to_owned(),
                })
                .unwrap();
        }
        let ids: Vec<u32> = storage
            .list_app_patterns()
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![3, 20, 100]);
    }

    #[test]
    fn test_samples_filtered_by_mac() {
        let storage = storage();
        let a = mac("aa:bb:cc:dd:ee:01");
        let b = mac("aa:bb:cc:dd:ee:02");
        for (m, offset) in [(&a, 0), (&b, 1), (&a, 2)] {
            storage
                .append_sample(&PresenceSample {
                    mac: *m,
                    observed_at: Utc::now() + chrono::Duration::seconds(offset),
                    bytes_in_delta: 0,
                    bytes_out_delta: 0,
                    ping_responded: false,
                    active: false,
                })
                .unwrap();
        }
        assert_eq!(storage.samples_for(&a, 0).unwrap().len(), 2);
        assert_eq!(storage.samples_for(&b, 0).unwrap().len(), 1);
    }
}
