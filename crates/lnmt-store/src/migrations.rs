//! Logical schema migrations.
//!
//! The key-value layer is schemaless; migrations rewrite stored values
//! when their JSON shape changes. Steps are identified by a monotonically
//! increasing integer and must be idempotent on their target version, so
//! a crash between apply and version bump is harmless.

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

/// Version the code expects after all migrations ran.
pub const SCHEMA_VERSION: u32 = 2;

const NS_META: &str = "meta";
const KEY_SCHEMA_VERSION: &str = "schema_version";
const KEY_CREATED_AT: &str = "created_at";

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&dyn KvStore) -> StoreResult<()>,
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "initial-layout",
            apply: initial_layout,
        },
        Migration {
            version: 2,
            name: "usage-session-timestamps",
            apply: usage_session_timestamps,
        },
    ]
}

/// Stamp the store's creation time once.
fn initial_layout(store: &dyn KvStore) -> StoreResult<()> {
    if store.get(NS_META, KEY_CREATED_AT)?.is_none() {
        let now = chrono::Utc::now().to_rfc3339();
        store.set(NS_META, KEY_CREATED_AT, now.into_bytes())?;
    }
    Ok(())
}

/// Usage sessions historically carried only `seconds_used`; the canonical
/// shape stores `started_at`/`ended_at`. Legacy rows are backfilled with
/// explicit nulls so deserialization into the current type succeeds.
fn usage_session_timestamps(store: &dyn KvStore) -> StoreResult<()> {
    const NS_SESSIONS: &str = "tracker:sessions";
    for key in store.list_keys(NS_SESSIONS)? {
        let Some(raw) = store.get(NS_SESSIONS, &key)? else {
            continue;
        };
        let mut value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let Some(obj) = value.as_object_mut() else {
            continue;
        };
        if obj.contains_key("started_at") {
            continue;
        }
        obj.insert("started_at".to_owned(), serde_json::Value::Null);
        obj.insert("ended_at".to_owned(), serde_json::Value::Null);
        let rewritten =
            serde_json::to_vec(&value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        store.set(NS_SESSIONS, &key, rewritten)?;
    }
    Ok(())
}

fn read_version(store: &dyn KvStore) -> StoreResult<u32> {
    match store.get(NS_META, KEY_SCHEMA_VERSION)? {
        Some(raw) => {
            let text = String::from_utf8(raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            text.parse()
                .map_err(|e| StoreError::Serialization(format!("schema version: {e}")))
        }
        None => Ok(0),
    }
}

/// Bring the store up to [`SCHEMA_VERSION`], applying pending steps in order.
///
/// Returns the resulting version.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] wrapping the first failing step; the
/// version is left at the last successfully applied step.
pub fn run_migrations(store: &dyn KvStore) -> StoreResult<u32> {
    let mut current = read_version(store)?;
    for migration in migrations() {
        if migration.version <= current {
            continue;
        }
        (migration.apply)(store).map_err(|e| StoreError::Migration {
            version: migration.version,
            detail: e.to_string(),
        })?;
        store.set(
            NS_META,
            KEY_SCHEMA_VERSION,
            migration.version.to_string().into_bytes(),
        )?;
        info!(version = migration.version, name = migration.name, "applied migration");
        current = migration.version;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[test]
    fn test_migrates_fresh_store_to_latest() {
        let store = MemoryKvStore::new();
        assert_eq!(run_migrations(&store).unwrap(), SCHEMA_VERSION);
        // Running again is a no-op.
        assert_eq!(run_migrations(&store).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_backfills_legacy_usage_sessions() {
        let store = MemoryKvStore::new();
        let legacy = serde_json::json!({
            "id": "s1",
            "mac": "aa:bb:cc:dd:ee:01",
            "seconds_used": 42
        });
        store
            .set(
                "tracker:sessions",
                "s1",
                serde_json::to_vec(&legacy).unwrap(),
            )
            .unwrap();

        run_migrations(&store).unwrap();

        let raw = store.get("tracker:sessions", "s1").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value["started_at"].is_null());
        assert!(value["ended_at"].is_null());
        assert_eq!(value["seconds_used"], 42);
    }

    #[test]
    fn test_does_not_clobber_current_shape_sessions() {
        let store = MemoryKvStore::new();
        let current = serde_json::json!({
            "id": "s2",
            "started_at": "2024-06-01T00:00:00Z",
            "ended_at": null,
            "seconds_used": 7
        });
        store
            .set(
                "tracker:sessions",
                "s2",
                serde_json::to_vec(&current).unwrap(),
            )
            .unwrap();

        run_migrations(&store).unwrap();

        let raw = store.get("tracker:sessions", "s2").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["started_at"], "2024-06-01T00:00:00Z");
    }
}
