//! LNMT Store - unified persistence for all subsystems.
//!
//! The store is the single point of shared mutable state. It is split in
//! two logical tiers:
//!
//! - **Configuration tier**: jobs, users, settings, policies. Small,
//!   read-mostly, always present.
//! - **Operational tier**: run history, usage sessions, device
//!   observations, audit rows. Append-heavy, may live in a separate
//!   backend, and falls back into the configuration tier when that
//!   backend is unavailable.
//!
//! Access is byte-level and namespaced through the [`KvStore`] trait;
//! subsystems layer their typed storage on top of it. Cross-subsystem
//! invariants (one RUNNING run per job) are enforced with
//! [`KvStore::compare_and_swap`], not with application locks.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod audit;
pub mod error;
pub mod kv;
pub mod migrations;
pub mod sqlite;
pub mod tiered;

pub use audit::{AuditEvent, AuditLog, AuditQuery};
pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, MemoryKvStore};
pub use migrations::{run_migrations, SCHEMA_VERSION};
pub use sqlite::SqliteKvStore;
pub use tiered::TieredStore;
