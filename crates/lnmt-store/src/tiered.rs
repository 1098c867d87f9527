//! Tier routing: which backend stores which namespace.
//!
//! The split is a policy of the store, not of the callers. Configuration
//! namespaces always live in the primary backend. Operational namespaces
//! go to the dedicated operational backend when one is configured; when
//! it fails, the call falls back to the primary backend so observations
//! are not lost while the large-tier database is down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::StoreResult;
use crate::kv::KvStore;

/// Namespace prefixes that belong to the operational tier.
const OPERATIONAL_PREFIXES: &[&str] = &[
    "sched:runs",
    "tracker:sessions",
    "tracker:presence",
    "health:samples",
    "heal:log",
    "audit:",
];

fn is_operational(namespace: &str) -> bool {
    OPERATIONAL_PREFIXES
        .iter()
        .any(|prefix| namespace.starts_with(prefix))
}

/// A [`KvStore`] that routes namespaces across two backends.
pub struct TieredStore {
    config: Arc<dyn KvStore>,
    ops: Option<Arc<dyn KvStore>>,
    ops_degraded: AtomicBool,
}

impl TieredStore {
    /// Create a tiered store. With `ops = None` everything lives in the
    /// configuration backend.
    #[must_use]
    pub fn new(config: Arc<dyn KvStore>, ops: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            config,
            ops,
            ops_degraded: AtomicBool::new(false),
        }
    }

    /// Whether the operational backend has failed and reads/writes are
    /// currently falling back to the configuration tier.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.ops_degraded.load(Ordering::Relaxed)
    }

    fn run<T>(
        &self,
        namespace: &str,
        op: impl Fn(&dyn KvStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        if is_operational(namespace) {
            if let Some(ops) = &self.ops {
                match op(ops.as_ref()) {
                    Ok(value) => {
                        self.ops_degraded.store(false, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(err) => {
                        if !self.ops_degraded.swap(true, Ordering::Relaxed) {
                            warn!(%namespace, error = %err, "operational tier failed, falling back to configuration tier");
                        }
                    }
                }
            }
        }
        op(self.config.as_ref())
    }
}

impl KvStore for TieredStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run(namespace, |store| store.get(namespace, key))
    }

    fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.run(namespace, |store| store.set(namespace, key, value.clone()))
    }

    fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.run(namespace, |store| store.delete(namespace, key))
    }

    fn list_keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        self.run(namespace, |store| store.list_keys(namespace))
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> StoreResult<bool> {
        self.run(namespace, |store| {
            store.compare_and_swap(namespace, key, expected, new.clone())
        })
    }
}

impl std::fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("has_ops_tier", &self.ops.is_some())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}
