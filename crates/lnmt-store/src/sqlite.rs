//! SQLite-backed key-value store.
//!
//! One table holds every namespace. WAL mode keeps readers and the single
//! writer from blocking each other; the connection itself is behind a
//! mutex, which serializes writes per process in addition to SQLite's own
//! file locking.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

/// SQLite backend for [`KvStore`].
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open (creating if needed) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be opened
    /// or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(sql_err)?;
        Self::init(conn, Some(path.as_ref()))
    }

    /// Open an in-memory database (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if initialization fails.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sql_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                ns TEXT NOT NULL,
                k  TEXT NOT NULL,
                v  BLOB NOT NULL,
                PRIMARY KEY (ns, k)
            );",
        )
        .map_err(sql_err)?;
        if let Some(path) = path {
            info!(path = %path.display(), "opened sqlite store");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_owned()))
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl KvStore for SqliteKvStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT v FROM kv WHERE ns = ?1 AND k = ?2",
            params![namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)
    }

    fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (ns, k, v) VALUES (?1, ?2, ?3)
             ON CONFLICT (ns, k) DO UPDATE SET v = excluded.v",
            params![namespace, key, value],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM kv WHERE ns = ?1 AND k = ?2",
            params![namespace, key],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT k FROM kv WHERE ns = ?1 ORDER BY k ASC")
            .map_err(sql_err)?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(sql_err)?;

        let current: Option<Vec<u8>> = tx
            .query_row(
                "SELECT v FROM kv WHERE ns = ?1 AND k = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;

        if current.as_deref() != expected {
            return Ok(false);
        }

        match new {
            Some(value) => {
                tx.execute(
                    "INSERT INTO kv (ns, k, v) VALUES (?1, ?2, ?3)
                     ON CONFLICT (ns, k) DO UPDATE SET v = excluded.v",
                    params![namespace, key, value],
                )
                .map_err(sql_err)?;
            }
            None => {
                tx.execute(
                    "DELETE FROM kv WHERE ns = ?1 AND k = ?2",
                    params![namespace, key],
                )
                .map_err(sql_err)?;
            }
        }
        tx.commit().map_err(sql_err)?;
        Ok(true)
    }
}

impl std::fmt::Debug for SqliteKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKvStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_in_memory() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.set("ns", "k", b"v".to_vec()).unwrap();
        assert_eq!(store.get("ns", "k").unwrap().unwrap(), b"v");
        store.delete("ns", "k").unwrap();
        assert!(store.get("ns", "k").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.set("ns", "k", b"v".to_vec()).unwrap();
        }
        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(store.get("ns", "k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_cas_semantics_match_memory_backend() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        assert!(store
            .compare_and_swap("ns", "k", None, Some(b"v1".to_vec()))
            .unwrap());
        assert!(!store
            .compare_and_swap("ns", "k", None, Some(b"v2".to_vec()))
            .unwrap());
        assert!(store
            .compare_and_swap("ns", "k", Some(b"v1"), Some(b"v2".to_vec()))
            .unwrap());
        assert!(store
            .compare_and_swap("ns", "k", Some(b"v2"), None)
            .unwrap());
        assert!(store.get("ns", "k").unwrap().is_none());
    }

    #[test]
    fn test_list_keys_sorted() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.set("ns", "2", vec![]).unwrap();
        store.set("ns", "1", vec![]).unwrap();
        store.set("other", "x", vec![]).unwrap();
        assert_eq!(store.list_keys("ns").unwrap(), vec!["1", "2"]);
    }
}
