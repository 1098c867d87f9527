//! schedctl - operate the LNMT job scheduler.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lnmt_cli::{emit, finish, render_table, CliContext, OutputFormat};
use lnmt_core::JobId;
use lnmt_sched::{export_jobs, import_jobs, validate_definitions, Job, Priority};

/// Operate the LNMT job scheduler.
#[derive(Parser)]
#[command(name = "schedctl", version, about)]
struct Cli {
    /// Path to a configuration file layered over the defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Actor recorded in the audit log.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered jobs.
    List,
    /// Register a new job.
    Add {
        /// Stable job id.
        id: String,
        /// Human-readable name (defaults to the id).
        #[arg(long)]
        name: Option<String>,
        /// Function-registry target, e.g. `tracker.poll`.
        #[arg(long)]
        target: String,
        /// Cron expression, quoted, e.g. `"*/5 * * * *"`.
        #[arg(long)]
        schedule: String,
        /// Priority: LOW, NORMAL, HIGH, CRITICAL.
        #[arg(long, default_value = "NORMAL")]
        priority: String,
        /// Retries after the first failure.
        #[arg(long, default_value_t = 0)]
        max_retries: u32,
        /// Base retry delay in seconds.
        #[arg(long, default_value_t = 60)]
        retry_delay: u32,
        /// Per-attempt timeout in seconds.
        #[arg(long, default_value_t = 300)]
        timeout: u32,
        /// Dependency job ids (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Register disabled.
        #[arg(long)]
        disabled: bool,
    },
    /// Unregister a job (history is retained).
    Remove {
        /// Job id.
        id: String,
    },
    /// Run a job immediately and wait for the outcome.
    Run {
        /// Job id.
        id: String,
    },
    /// Show run history.
    History {
        /// Restrict to one job.
        #[arg(long)]
        job: Option<String>,
        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show scheduler status.
    Status,
    /// Enable a job.
    Enable {
        /// Job id.
        id: String,
    },
    /// Disable a job (a running run is not cancelled).
    Disable {
        /// Job id.
        id: String,
    },
    /// Export job definitions as TOML.
    Export,
    /// Import a job-definitions file.
    Import {
        /// Definitions file.
        file: PathBuf,
        /// Update existing ids instead of failing on duplicates.
        #[arg(long)]
        replace: bool,
    },
    /// Validate a job-definitions file without registering anything.
    Validate {
        /// Definitions file.
        file: PathBuf,
    },
}

fn job_rows(jobs: &[Job]) -> Vec<Vec<String>> {
    jobs.iter()
        .map(|job| {
            vec![
                job.id.to_string(),
                job.name.clone(),
                job.schedule.to_string(),
                job.priority.to_string(),
                job.target.clone(),
                if job.enabled { "yes" } else { "no" }.to_owned(),
                job.dependencies
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ]
        })
        .collect()
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::open(cli.config.as_deref())?;
    let scheduler = &ctx.engines.scheduler;
    let actor = cli.actor.as_str();

    match cli.command {
        Commands::List => {
            let jobs = scheduler.jobs()?;
            emit(cli.format, &jobs, |jobs| {
                render_table(
                    &["ID", "NAME", "SCHEDULE", "PRIORITY", "TARGET", "ENABLED", "DEPENDS"],
                    &job_rows(jobs),
                )
            })?;
        }
        Commands::Add {
            id,
            name,
            target,
            schedule,
            priority,
            max_retries,
            retry_delay,
            timeout,
            depends_on,
            disabled,
        } => {
            let priority: Priority = serde_json::from_value(serde_json::Value::String(
                priority.to_uppercase(),
            ))
            .map_err(|_| anyhow::anyhow!("unknown priority: {priority}"))?;
            let now = Utc::now();
            let job = Job {
                id: JobId::new(&id),
                name: name.unwrap_or_else(|| id.clone()),
                target,
                schedule: schedule
                    .parse()
                    .with_context(|| format!("parsing schedule \"{schedule}\""))?,
                priority,
                max_retries,
                retry_delay_s: retry_delay,
                timeout_s: timeout,
                dependencies: depends_on.into_iter().map(JobId::new).collect::<BTreeSet<_>>(),
                enabled: !disabled,
                args: Vec::new(),
                kwargs: serde_json::Map::new(),
                created_at: now,
                updated_at: now,
            };
            scheduler.register(actor, job)?;
            println!("registered {id}");
        }
        Commands::Remove { id } => {
            scheduler.unregister(actor, &JobId::new(&id))?;
            println!("removed {id}");
        }
        Commands::Run { id } => {
            let run = scheduler.run_now(actor, &JobId::new(&id))?;
            scheduler.await_idle().await;
            let outcome = scheduler
                .history(Some(&run.job_id), 0)?
                .into_iter()
                .find(|r| r.run_id == run.run_id)
                .unwrap_or(run);
            emit(cli.format, &outcome, |run| {
                let mut text = format!("{} {} {}\n", run.run_id, run.job_id, run.status);
                if let Some(error) = &run.error {
                    text.push_str(&format!("error: {error}\n"));
                }
                if let Some(output) = &run.output {
                    text.push_str(output);
                    text.push('\n');
                }
                text
            })?;
        }
        Commands::History { job, limit } => {
            let job_id = job.map(|id| JobId::new(&id));
            let runs = scheduler.history(job_id.as_ref(), limit)?;
            emit(cli.format, &runs, |runs| {
                let rows = runs
                    .iter()
                    .map(|run| {
                        vec![
                            run.started_at.to_rfc3339(),
                            run.job_id.to_string(),
                            run.status.to_string(),
                            run.retry_count.to_string(),
                            format!("{:?}", run.trigger).to_lowercase(),
                            run.error.clone().unwrap_or_default(),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(
                    &["STARTED", "JOB", "STATUS", "RETRY", "TRIGGER", "ERROR"],
                    &rows,
                )
            })?;
        }
        Commands::Status => {
            let status = scheduler.status()?;
            emit(cli.format, &status, |status| {
                let mut text = format!(
                    "running: {}\nin flight: {}\npending retries: {}\n",
                    status.running, status.in_flight, status.pending_retries
                );
                if let Some(next) = status.next_tick {
                    text.push_str(&format!("next tick: {}\n", next.to_rfc3339()));
                }
                for (priority, count) in &status.deferred {
                    text.push_str(&format!("deferred {priority}: {count}\n"));
                }
                text
            })?;
        }
        Commands::Enable { id } => {
            scheduler.enable(actor, &JobId::new(&id))?;
            println!("enabled {id}");
        }
        Commands::Disable { id } => {
            scheduler.disable(actor, &JobId::new(&id))?;
            println!("disabled {id}");
        }
        Commands::Export => {
            let document = export_jobs(&scheduler.jobs()?)?;
            print!("{document}");
        }
        Commands::Import { file, replace } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let applied = import_jobs(scheduler, actor, &text, replace)?;
            println!("imported {applied} jobs");
        }
        Commands::Validate { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let count = validate_definitions(&text)?;
            println!("ok: {count} definitions");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    finish(run(cli).await);
}
