//! lnmtd - the LNMT control-plane daemon.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lnmt_telemetry::{setup_logging, LogConfig, LogFormat};

/// LNMT control-plane daemon.
#[derive(Parser)]
#[command(name = "lnmtd", version, about)]
struct Args {
    /// Path to a configuration file layered over the defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Re-import this job-definitions file before starting (replace
    /// semantics). Without it, the persisted registry is authoritative.
    #[arg(long)]
    import_jobs: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = lnmt_config::load(args.config.as_deref()).context("loading configuration")?;

    let format: LogFormat = config
        .logging
        .format
        .parse()
        .unwrap_or(LogFormat::Compact);
    setup_logging(
        &LogConfig::new(&config.logging.level).with_format(format),
    )
    .context("initializing logging")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?
        .block_on(lnmt_daemon::run(config, args.import_jobs.as_deref()))
}
