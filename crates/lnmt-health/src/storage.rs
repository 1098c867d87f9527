//! Typed health storage over the key-value store.
//!
//! Probe configuration lives in the configuration tier; samples and the
//! self-heal log are append-heavy and ride the operational tier.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lnmt_core::ProbeId;
use lnmt_store::{KvStore, StoreError, StoreResult};
use serde::Serialize;

use crate::types::{HealState, HealthProbe, HealthSample, SelfHealLogRow};

const NS_PROBES: &str = "health:probes";
const NS_SAMPLES: &str = "health:samples";
const NS_HEAL_STATE: &str = "health:heal_state";
const NS_HEAL_LOG: &str = "heal:log";

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn time_key(at: DateTime<Utc>, suffix: &str) -> String {
    format!("{:020}:{suffix}", at.timestamp_micros().max(0))
}

/// Health rows in the store.
#[derive(Clone)]
pub struct HealthStorage {
    store: Arc<dyn KvStore>,
}

impl HealthStorage {
    /// Create storage over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Insert or update a probe configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_probe(&self, probe: &HealthProbe) -> StoreResult<()> {
        self.store.set(NS_PROBES, probe.id.as_str(), encode(probe)?)
    }

    /// Fetch a probe configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn get_probe(&self, probe_id: &ProbeId) -> StoreResult<Option<HealthProbe>> {
        match self.store.get(NS_PROBES, probe_id.as_str())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove a probe configuration and its heal state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    pub fn delete_probe(&self, probe_id: &ProbeId) -> StoreResult<()> {
        self.store.delete(NS_PROBES, probe_id.as_str())?;
        self.store.delete(NS_HEAL_STATE, probe_id.as_str())
    }

    /// All probe configurations, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn list_probes(&self) -> StoreResult<Vec<HealthProbe>> {
        let mut probes = Vec::new();
        for key in self.store.list_keys(NS_PROBES)? {
            if let Some(raw) = self.store.get(NS_PROBES, &key)? {
                probes.push(decode(&raw)?);
            }
        }
        Ok(probes)
    }

    /// Append a sample.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn append_sample(&self, sample: &HealthSample) -> StoreResult<()> {
        let key = time_key(sample.at, sample.probe_id.as_str());
        self.store.set(NS_SAMPLES, &key, encode(sample)?)
    }

    /// Recent samples for a probe, newest first. `limit` zero = all.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn samples_for(&self, probe_id: &ProbeId, limit: usize) -> StoreResult<Vec<HealthSample>> {
        let suffix = format!(":{}", probe_id.as_str());
        let mut keys = self.store.list_keys(NS_SAMPLES)?;
        keys.reverse();

        let mut samples = Vec::new();
        for key in keys {
            if !key.ends_with(&suffix) {
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

    /// Fetch heal state, defaulting to fresh state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn get_heal_state(&self, probe_id: &ProbeId) -> StoreResult<HealState> {
        match self.store.get(NS_HEAL_STATE, probe_id.as_str())? {
            Some(raw) => decode(&raw),
            None => Ok(HealState::default()),
        }
    }

    /// Persist heal state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn put_heal_state(&self, probe_id: &ProbeId, state: &HealState) -> StoreResult<()> {
        self.store
            .set(NS_HEAL_STATE, probe_id.as_str(), encode(state)?)
    }

    /// Append a self-heal log row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on persistence failure.
    pub fn append_heal_log(&self, row: &SelfHealLogRow) -> StoreResult<()> {
        let key = time_key(row.at, row.module.as_str());
        self.store.set(NS_HEAL_LOG, &key, encode(row)?)
    }

    /// Recent self-heal log rows, newest first. `limit` zero = all.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on retrieval or deserialization failure.
    pub fn heal_log(&self, limit: usize) -> StoreResult<Vec<SelfHealLogRow>> {
        let mut keys = self.store.list_keys(NS_HEAL_LOG)?;
        keys.reverse();
        let mut rows = Vec::new();
        for key in keys {
            if let Some(raw) = self.store.get(NS_HEAL_LOG, &key)? {
                rows.push(decode(&raw)?);
                if limit > 0 && rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for HealthStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthStorage").finish_non_exhaustive()
    }
}
