//! Append-only audit log.
//!
//! Every auth decision, registry mutation, threshold change, and skipped
//! lease line lands here. Callers sanitize `details` before recording;
//! passwords and tokens must never reach this layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

const NS_AUDIT: &str = "audit:events";

/// Immutable record of a policy-affecting action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the action happened.
    pub at: DateTime<Utc>,
    /// Who did it (`"system"` for unattended actions).
    pub actor: String,
    /// What was done, e.g. `"login"`, `"job_register"`.
    pub action: String,
    /// What it was done to.
    pub target: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Sanitized free-form detail.
    pub details: String,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    pub fn now(
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        success: bool,
        details: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            success,
            details: details.into(),
        }
    }
}

/// Filter for audit queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Exact actor match.
    pub actor: Option<String>,
    /// Exact action match.
    pub action: Option<String>,
    /// Maximum rows returned (most recent first). Zero means unlimited.
    pub limit: usize,
}

/// Handle to the audit namespace of a store.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn KvStore>,
}

impl AuditLog {
    /// Create a log over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Append an event.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the event cannot be persisted.
    pub fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        // Keys sort by time, then by a uuid tiebreak for same-microsecond rows.
        let key = format!(
            "{:020}:{}",
            event.at.timestamp_micros().max(0),
            Uuid::new_v4()
        );
        let value =
            serde_json::to_vec(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(NS_AUDIT, &key, value)
    }

    /// Query events, most recent first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let mut keys = self.store.list_keys(NS_AUDIT)?;
        keys.reverse();

        let mut events = Vec::new();
        for key in keys {
            let Some(raw) = self.store.get(NS_AUDIT, &key)? else {
                continue;
            };
            let event: AuditEvent = serde_json::from_slice(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if let Some(since) = query.since {
                if event.at < since {
                    continue;
                }
            }
            if let Some(until) = query.until {
                if event.at > until {
                    continue;
                }
            }
            if let Some(actor) = &query.actor {
                if &event.actor != actor {
                    continue;
                }
            }
            if let Some(action) = &query.action {
                if &event.action != action {
                    continue;
                }
            }
            events.push(event);
            if query.limit > 0 && events.len() >= query.limit {
                break;
            }
        }
        Ok(events)
    }

    /// Total number of recorded events.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.store.list_keys(NS_AUDIT)?.len())
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn log() -> AuditLog {
        AuditLog::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn test_record_and_query() {
        let log = log();
        log.record(&AuditEvent::now("alice", "login", "alice", true, ""))
            .unwrap();
        log.record(&AuditEvent::now("bob", "login", "bob", false, "bad password"))
            .unwrap();

        let all = log.query(&AuditQuery::default()).unwrap();
        assert_eq!(all.len(), 2);

        let alice_only = log
            .query(&AuditQuery {
                actor: Some("alice".to_owned()),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(alice_only.len(), 1);
        assert!(alice_only[0].success);
    }

    #[test]
    fn test_query_most_recent_first_with_limit() {
        let log = log();
        for i in 0..5 {
            let mut event = AuditEvent::now("system", "tick", format!("t{i}"), true, "");
            event.at = Utc::now() + chrono::Duration::seconds(i);
            log.record(&event).unwrap();
        }

        let recent = log
            .query(&AuditQuery {
                limit: 2,
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target, "t4");
        assert_eq!(recent[1].target, "t3");
    }

    #[test]
    fn test_time_range_filter() {
        let log = log();
        let base = Utc::now();
        for i in 0..3 {
            let mut event = AuditEvent::now("system", "tick", format!("t{i}"), true, "");
            event.at = base + chrono::Duration::minutes(i);
            log.record(&event).unwrap();
        }

        let middle = log
            .query(&AuditQuery {
                since: Some(base + chrono::Duration::seconds(30)),
                until: Some(base + chrono::Duration::seconds(90)),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].target, "t1");
    }
}
