//! healthctl - inspect probes and the self-heal log.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lnmt_cli::{emit, finish, render_table, CliContext, OutputFormat};
use lnmt_core::{JobId, ProbeId};
use lnmt_health::{HealthProbe, ProbeKind};

/// Inspect and manage health probes.
#[derive(Parser)]
#[command(name = "healthctl", version, about)]
struct Cli {
    /// Path to a configuration file layered over the defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-probe health summary.
    Status,
    /// Manage probe configurations.
    Probes {
        #[command(subcommand)]
        command: ProbeCommands,
    },
    /// Clear a probe's failure streak and escalation latch.
    Reset {
        /// Probe id.
        id: String,
    },
    /// Show the self-heal log.
    Log {
        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ProbeCommands {
    /// List configured probes.
    List,
    /// Add or replace a probe.
    Add {
        /// Probe id.
        id: String,
        /// Kind: process, port, http, disk, custom.
        #[arg(long)]
        kind: String,
        /// Kind-specific target: process name, host:port, URL, mount
        /// point, or custom check name.
        #[arg(long)]
        target: String,
        /// Seconds between checks.
        #[arg(long, default_value_t = 30)]
        interval: u32,
        /// Consecutive failures before recovery fires.
        #[arg(long, default_value_t = 3)]
        threshold: u32,
        /// Maximum used percent (disk probes only).
        #[arg(long, default_value_t = 90)]
        max_used_percent: u8,
        /// Scheduler job submitted on breach.
        #[arg(long)]
        recovery: Option<String>,
    },
    /// Remove a probe.
    Remove {
        /// Probe id.
        id: String,
    },
}

fn probe_kind(kind: &str, target: String, max_used_percent: u8) -> anyhow::Result<ProbeKind> {
    Ok(match kind {
        "process" => ProbeKind::Process { name: target },
        "port" => ProbeKind::Port { addr: target },
        "http" => ProbeKind::Http { url: target },
        "disk" => ProbeKind::Disk {
            path: target,
            max_used_percent,
        },
        "custom" => ProbeKind::Custom { name: target },
        other => anyhow::bail!("unknown probe kind: {other}"),
    })
}

fn describe_kind(kind: &ProbeKind) -> (String, String) {
    match kind {
        ProbeKind::Process { name } => ("process".to_owned(), name.clone()),
        ProbeKind::Port { addr } => ("port".to_owned(), addr.clone()),
        ProbeKind::Http { url } => ("http".to_owned(), url.clone()),
        ProbeKind::Disk {
            path,
            max_used_percent,
        } => ("disk".to_owned(), format!("{path} (<= {max_used_percent}%)")),
        ProbeKind::Custom { name } => ("custom".to_owned(), name.clone()),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::open(cli.config.as_deref())?;
    let health = &ctx.engines.health;

    match cli.command {
        Commands::Status => {
            let summaries = health.status()?;
            emit(cli.format, &summaries, |summaries| {
                let rows = summaries
                    .iter()
                    .map(|summary| {
                        vec![
                            summary.probe_id.to_string(),
                            summary
                                .last_status
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "never ran".to_owned()),
                            summary.consecutive_failures.to_string(),
                            summary.attempts_in_window.to_string(),
                            if summary.notified { "NOTIFIED" } else { "" }.to_owned(),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(
                    &["PROBE", "LAST", "FAILS", "HEALS", "ESCALATION"],
                    &rows,
                )
            })?;
        }
        Commands::Probes { command } => match command {
            ProbeCommands::List => {
                let probes = health.storage().list_probes()?;
                emit(cli.format, &probes, |probes| {
                    let rows = probes
                        .iter()
                        .map(|probe| {
                            let (kind, target) = describe_kind(&probe.kind);
                            vec![
                                probe.id.to_string(),
                                kind,
                                target,
                                probe.interval_s.to_string(),
                                probe.failure_threshold.to_string(),
                                probe
                                    .recovery_action
                                    .as_ref()
                                    .map(ToString::to_string)
                                    .unwrap_or_default(),
                            ]
                        })
                        .collect::<Vec<_>>();
                    render_table(
                        &["PROBE", "KIND", "TARGET", "INTERVAL", "THRESHOLD", "RECOVERY"],
                        &rows,
                    )
                })?;
            }
            ProbeCommands::Add {
                id,
                kind,
                target,
                interval,
                threshold,
                max_used_percent,
                recovery,
            } => {
                let probe = HealthProbe {
                    id: ProbeId::new(&id),
                    kind: probe_kind(&kind, target, max_used_percent)?,
                    interval_s: interval,
                    failure_threshold: threshold,
                    recovery_action: recovery.map(JobId::new),
                };
                health.put_probe(probe)?;
                println!("probe {id} saved");
            }
            ProbeCommands::Remove { id } => {
                health.delete_probe(&ProbeId::new(&id))?;
                println!("probe {id} removed");
            }
        },
        Commands::Reset { id } => {
            health.reset(&ProbeId::new(&id))?;
            println!("probe {id} reset");
        }
        Commands::Log { limit } => {
            let rows = health.storage().heal_log(limit)?;
            emit(cli.format, &rows, |rows| {
                let table_rows = rows
                    .iter()
                    .map(|row| {
                        vec![
                            row.at.to_rfc3339(),
                            row.module.to_string(),
                            row.action.clone(),
                            row.status.clone(),
                            row.attempts.to_string(),
                            row.error.clone().unwrap_or_default(),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(
                    &["AT", "PROBE", "ACTION", "STATUS", "ATTEMPT", "ERROR"],
                    &table_rows,
                )
            })?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    finish(run(cli).await);
}
