//! LNMT Config - layered TOML configuration.
//!
//! Load order: embedded defaults, then `/etc/lnmt/config.toml`, then
//! `~/.lnmt/config.toml`, then an explicit `--config` path, then `LNMT_*`
//! environment overrides. Later layers win key-by-key. Every section
//! implements [`Default`] with production values, so a bare `[section]`
//! header produces a working configuration.
//!
//! The file is authoritative at startup only: job and user mutations made
//! through the CLI or API persist to the store, and restarts observe the
//! persisted state unless an explicit re-import is requested.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod loader;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load, load_from_str};
pub use types::{
    AuthSection, Config, DetectionSection, HealthSection, LoggingSection, SchedulerSection,
    StoreSection, TrackerSection,
};
pub use validate::validate;
