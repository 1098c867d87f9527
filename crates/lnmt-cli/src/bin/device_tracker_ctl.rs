//! device_tracker_ctl - inspect tracked devices and sessions.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lnmt_cli::{emit, finish, render_table, CliContext, OutputFormat};
use lnmt_core::{MacAddr, VlanId};
use lnmt_tracker::DeviceFilter;

/// Inspect tracked devices, sessions, and alerts.
#[derive(Parser)]
#[command(name = "device_tracker_ctl", version, about)]
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
    /// List devices.
    List {
        /// Only devices on this VLAN.
        #[arg(long)]
        vlan: Option<u16>,
        /// Only hostnames containing this substring.
        #[arg(long)]
        hostname: Option<String>,
        /// Only devices currently online.
        #[arg(long)]
        online: bool,
    },
    /// Presence and session history for a device.
    History {
        /// Device MAC, any common form.
        mac: String,
        /// Maximum rows per section.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Recent VLAN threshold breaches.
    Alerts {
        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Tracker status summary.
    Status,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::open(cli.config.as_deref())?;
    let tracker = &ctx.engines.tracker;

    match cli.command {
        Commands::List {
            vlan,
            hostname,
            online,
        } => {
            let filter = DeviceFilter {
                vlan_id: vlan.map(VlanId),
                hostname_contains: hostname,
                online: online.then_some(true),
            };
            let devices = tracker.list_devices(&filter)?;
            emit(cli.format, &devices, |devices| {
                let rows = devices
                    .iter()
                    .map(|device| {
                        vec![
                            device.mac.to_string(),
                            device.ip.clone(),
                            device.hostname.clone(),
                            device
                                .vlan_id
                                .map(|v| v.to_string())
                                .unwrap_or_default(),
                            device.last_seen.to_rfc3339(),
                            if device.reservation.is_some() {
                                "yes"
                            } else {
                                ""
                            }
                            .to_owned(),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(
                    &["MAC", "IP", "HOSTNAME", "VLAN", "LAST SEEN", "RESERVED"],
                    &rows,
                )
            })?;
        }
        Commands::History { mac, limit } => {
            let mac: MacAddr = mac
                .parse()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let (samples, sessions) = tracker.history(&mac, limit)?;
            emit(cli.format, &(samples, sessions), |(samples, sessions)| {
                let mut text = String::from("presence samples:\n");
                let sample_rows = samples
                    .iter()
                    .map(|sample| {
                        vec![
                            sample.observed_at.to_rfc3339(),
                            sample.bytes_in_delta.to_string(),
                            sample.bytes_out_delta.to_string(),
                            sample.ping_responded.to_string(),
                            sample.active.to_string(),
                        ]
                    })
                    .collect::<Vec<_>>();
                text.push_str(&render_table(
                    &["OBSERVED", "IN", "OUT", "PING", "ACTIVE"],
                    &sample_rows,
                ));
                text.push_str("\nusage sessions:\n");
                let session_rows = sessions
                    .iter()
                    .map(|session| {
                        vec![
                            session
                                .started_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default(),
                            session
                                .ended_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default(),
                            session.seconds_used.to_string(),
                            session.app_category.clone().unwrap_or_default(),
                        ]
                    })
                    .collect::<Vec<_>>();
                text.push_str(&render_table(
                    &["STARTED", "ENDED", "SECONDS", "CATEGORY"],
                    &session_rows,
                ));
                text
            })?;
        }
        Commands::Alerts { limit } => {
            let breaches = tracker.alerts(limit)?;
            emit(cli.format, &breaches, |breaches| {
                let rows = breaches
                    .iter()
                    .map(|breach| {
                        vec![
                            breach.at.to_rfc3339(),
                            breach.vlan_id.to_string(),
                            breach.observed_kbps.to_string(),
                            breach.threshold_kbps.to_string(),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(&["AT", "VLAN", "OBSERVED KBPS", "LIMIT KBPS"], &rows)
            })?;
        }
        Commands::Status => {
            let devices = tracker.list_devices(&DeviceFilter::default())?;
            let mut online = 0usize;
            for device in &devices {
                if tracker.is_online(&device.mac)? {
                    online += 1;
                }
            }
            let status = serde_json::json!({
                "devices": devices.len(),
                "online": online,
                "lease_file": ctx.config.tracker.lease_file,
                "poll_interval_s": ctx.config.tracker.poll_interval_s,
            });
            emit(cli.format, &status, |status| {
                format!(
                    "devices: {}\nonline: {}\nlease file: {}\npoll interval: {}s\n",
                    status["devices"], status["online"], status["lease_file"], status["poll_interval_s"]
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
