//! Namespaced key-value access and the in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// Namespaced byte-level key-value store.
///
/// Implementations must be thread-safe. Operations are fast in-process
/// calls; no implementation performs network I/O. Writes to a single key
/// are serialized by the backend, which is what makes
/// [`compare_and_swap`](KvStore::compare_and_swap) a sound concurrency
/// primitive for cross-task invariants.
pub trait KvStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backend fails.
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backend fails.
    fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backend fails.
    fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;

    /// List all keys in a namespace, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backend fails.
    fn list_keys(&self, namespace: &str) -> StoreResult<Vec<String>>;

    /// Atomically replace the value of `key` iff its current value equals
    /// `expected` (`None` = key absent). `new = None` deletes the key.
    ///
    /// Returns `true` when the swap happened, `false` when the current
    /// value differed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backend fails.
    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> StoreResult<bool>;
}

/// In-memory backend. Used by tests and as the operational-tier fallback.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("memory store lock poisoned".to_owned())
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        Ok(namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        namespaces
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        Ok(namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> StoreResult<bool> {
        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        let ns = namespaces.entry(namespace.to_owned()).or_default();
        let current = ns.get(key).map(Vec::as_slice);
        if current != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                ns.insert(key.to_owned(), value);
            }
            None => {
                ns.remove(key);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_delete() {
        let store = MemoryKvStore::new();
        assert!(store.get("ns", "k").unwrap().is_none());

        store.set("ns", "k", b"v".to_vec()).unwrap();
        assert_eq!(store.get("ns", "k").unwrap().unwrap(), b"v");

        store.delete("ns", "k").unwrap();
        assert!(store.get("ns", "k").unwrap().is_none());
        // Deleting again is fine.
        store.delete("ns", "k").unwrap();
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = MemoryKvStore::new();
        store.set("a", "k", b"1".to_vec()).unwrap();
        store.set("b", "k", b"2".to_vec()).unwrap();
        assert_eq!(store.get("a", "k").unwrap().unwrap(), b"1");
        assert_eq!(store.get("b", "k").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_list_keys_sorted() {
        let store = MemoryKvStore::new();
        store.set("ns", "b", vec![]).unwrap();
        store.set("ns", "a", vec![]).unwrap();
        store.set("ns", "c", vec![]).unwrap();
        assert_eq!(store.list_keys("ns").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cas_insert_when_absent() {
        let store = MemoryKvStore::new();
        assert!(store
            .compare_and_swap("ns", "k", None, Some(b"v1".to_vec()))
            .unwrap());
        // Second insert with the same expectation fails.
        assert!(!store
            .compare_and_swap("ns", "k", None, Some(b"v2".to_vec()))
            .unwrap());
        assert_eq!(store.get("ns", "k").unwrap().unwrap(), b"v1");
    }

    #[test]
    fn test_cas_replace_and_delete() {
        let store = MemoryKvStore::new();
        store.set("ns", "k", b"v1".to_vec()).unwrap();

        assert!(!store
            .compare_and_swap("ns", "k", Some(b"other"), Some(b"v2".to_vec()))
            .unwrap());
        assert!(store
            .compare_and_swap("ns", "k", Some(b"v1"), Some(b"v2".to_vec()))
            .unwrap());
        assert!(store
            .compare_and_swap("ns", "k", Some(b"v2"), None)
            .unwrap());
        assert!(store.get("ns", "k").unwrap().is_none());
    }
}
