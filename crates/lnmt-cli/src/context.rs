//! CLI context: config, store, engines.

use std::path::Path;

use anyhow::Context;
use lnmt_config::Config;
use lnmt_daemon::Engines;

/// Everything a CLI command needs. Engines are built over the same store
/// the daemon uses; the store-level running markers keep concurrent CLI
/// and daemon activity consistent.
pub struct CliContext {
    /// The merged configuration.
    pub config: Config,
    /// The wired engines.
    pub engines: Engines,
}

impl CliContext {
    /// Load configuration and open the store.
    ///
    /// # Errors
    ///
    /// Fails on configuration or store problems.
    pub fn open(config_path: Option<&Path>) -> anyhow::Result<Self> {
        // CLI tools log quietly; RUST_LOG still wins when set.
        let _ = lnmt_telemetry::setup_logging(&lnmt_telemetry::LogConfig::new("warn"));

        let config = lnmt_config::load(config_path).context("loading configuration")?;
        let store = lnmt_daemon::open_store(&config)?;
        let engines = lnmt_daemon::build_engines(&config, store)?;
        Ok(Self { config, engines })
    }
}
