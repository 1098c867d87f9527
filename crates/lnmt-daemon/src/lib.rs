//! lnmtd wiring: store setup, engine construction, builtin job bodies,
//! and the daemon run loop.
//!
//! The CLI tools link against this crate so that `schedctl run` executes
//! the same builtin job bodies the daemon registers, against the same
//! store. The store-level running marker keeps a CLI-invoked run and a
//! daemon-scheduled run of the same job mutually exclusive.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod jobs;
pub mod runtime;
pub mod sources;

pub use runtime::{build_engines, open_store, run, Engines};
