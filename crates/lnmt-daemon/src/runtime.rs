//! Store setup, engine construction, and the daemon run loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use lnmt_auth::{AuthEngine, AuthPolicy, AuthStorage, Role};
use lnmt_config::Config;
use lnmt_events::EventBus;
use lnmt_health::{DefaultCheckRunner, HealPolicy, HealthMonitor, HealthStorage};
use lnmt_sched::{import_jobs, JobFnRegistry, SchedStorage, Scheduler};
use lnmt_store::{run_migrations, AuditLog, KvStore, SqliteKvStore, TieredStore};
use lnmt_tracker::{DetectionSettings, DeviceTracker, NullSource, TrackerStorage};
use tracing::{info, warn};

use crate::jobs::{self, SchedulerRecovery};
use crate::sources::SystemPingProber;

/// How long a graceful drain waits for in-flight runs.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Everything the daemon (and the CLI tools) wire together.
pub struct Engines {
    /// The tiered store all subsystems share.
    pub store: Arc<dyn KvStore>,
    /// The audit log.
    pub audit: AuditLog,
    /// The event bus.
    pub events: EventBus,
    /// Authentication engine.
    pub auth: Arc<AuthEngine>,
    /// Job scheduler.
    pub scheduler: Scheduler,
    /// Device tracker.
    pub tracker: Arc<DeviceTracker>,
    /// Health monitor.
    pub health: Arc<HealthMonitor>,
}

impl Engines {
    /// The REST surface over these engines. The HTTP dispatcher (out of
    /// tree) calls one method per endpoint.
    #[must_use]
    pub fn api(&self) -> lnmt_api::ApiService {
        lnmt_api::ApiService::new(
            Arc::clone(&self.auth),
            self.scheduler.clone(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.health),
        )
    }
}

/// Open the configured store: the configuration-tier database, plus the
/// operational-tier database when `store.ops_path` is set.
///
/// # Errors
///
/// Fails when a database cannot be opened or migrations fail.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let primary: Arc<dyn KvStore> = Arc::new(
        SqliteKvStore::open(&config.store.path)
            .with_context(|| format!("opening store at {}", config.store.path))?,
    );
    let ops: Option<Arc<dyn KvStore>> = if config.store.ops_path.is_empty() {
        None
    } else {
        Some(Arc::new(
            SqliteKvStore::open(&config.store.ops_path)
                .with_context(|| format!("opening ops store at {}", config.store.ops_path))?,
        ))
    };

    let store: Arc<dyn KvStore> = Arc::new(TieredStore::new(primary, ops));
    let version = run_migrations(store.as_ref()).context("running migrations")?;
    info!(schema_version = version, "store ready");
    Ok(store)
}

/// Construct every engine over an opened store and register the builtin
/// job bodies.
///
/// # Errors
///
/// Fails on invalid configuration (e.g. an unknown timezone).
pub fn build_engines(config: &Config, store: Arc<dyn KvStore>) -> anyhow::Result<Engines> {
    let events = EventBus::new();
    let audit = AuditLog::new(Arc::clone(&store));

    let auth = Arc::new(AuthEngine::new(
        AuthStorage::new(Arc::clone(&store)),
        audit.clone(),
        events.clone(),
        AuthPolicy {
            session_idle_s: config.auth.session_idle_s,
            session_remember_s: config.auth.session_remember_s,
            lockout_threshold: config.auth.lockout_threshold,
            lockout_window_s: config.auth.lockout_window_s,
            lockout_duration_s: config.auth.lockout_duration_s,
        },
    ));

    let timezone: chrono_tz::Tz = config
        .scheduler
        .timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("scheduler.timezone: {e}"))?;

    let registry = JobFnRegistry::new();
    let sched_storage = SchedStorage::new(Arc::clone(&store));
    let scheduler = Scheduler::new(
        sched_storage.clone(),
        registry.clone(),
        events.clone(),
        audit.clone(),
        timezone,
        config.scheduler.max_workers,
    );

    let tracker = Arc::new(DeviceTracker::new(
        TrackerStorage::new(Arc::clone(&store)),
        audit.clone(),
        events.clone(),
        DetectionSettings {
            ping_window: config.detection.ping_window,
            min_bytes_in: config.detection.min_bytes_in,
            min_bytes_out: config.detection.min_bytes_out,
        },
        &config.tracker.lease_file,
        config.tracker.poll_interval_s,
        Arc::new(NullSource),
        Arc::new(SystemPingProber),
        Arc::new(NullSource),
    ));

    let health = Arc::new(HealthMonitor::new(
        HealthStorage::new(Arc::clone(&store)),
        events.clone(),
        Arc::new(DefaultCheckRunner::new()),
        Arc::new(SchedulerRecovery::new(scheduler.clone())),
        HealPolicy {
            max_attempts: config.health.heal_max_attempts,
            window_s: config.health.heal_window_s,
        },
    ));

    jobs::register_builtins(
        &registry,
        Arc::clone(&tracker),
        Arc::clone(&health),
        sched_storage,
        config.scheduler.history_retention_days,
        Arc::clone(&auth),
    )
    .map_err(|e| anyhow::anyhow!("registering builtin jobs: {e}"))?;

    Ok(Engines {
        store,
        audit,
        events,
        auth,
        scheduler,
        tracker,
        health,
    })
}

/// Run the daemon until SIGTERM/ctrl-c, then drain gracefully.
///
/// `import_path`, when given, re-imports a job-definitions file into the
/// store before the loops start (replace semantics). Otherwise the
/// persisted registry from previous runs is authoritative.
///
/// # Errors
///
/// Fails on startup problems; runtime loop failures are logged and
/// retried on the next iteration.
pub async fn run(config: Config, import_path: Option<&Path>) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let engines = build_engines(&config, store)?;

    // First boot: without an admin account the API and CLI are locked
    // out of everything. Create one with a random password the operator
    // must rotate.
    if engines.auth.list_users()?.is_empty() {
        let password = lnmt_auth::SessionToken::generate();
        engines
            .auth
            .create_user("system", "admin", password.as_str(), "", Role::Admin)?;
        warn!("created initial admin account; rotate its password with: authctl users passwd admin");
        println!("initial admin password: {}", password.as_str());
    }

    if let Some(path) = import_path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading job definitions {}", path.display()))?;
        let applied = import_jobs(&engines.scheduler, "import", &text, true)
            .map_err(|e| anyhow::anyhow!("importing job definitions: {e}"))?;
        info!(applied, path = %path.display(), "job definitions imported");
    }

    let handle = engines.scheduler.start();

    let tracker = Arc::clone(&engines.tracker);
    let poll_interval = Duration::from_secs(u64::from(config.tracker.poll_interval_s));
    let tracker_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // A lease file mid-rewrite or a briefly locked store is
            // transient; burn a small retry budget before giving up on
            // this cycle.
            let outcome = lnmt_core::retry(lnmt_core::RetryConfig::default(), "tracker.poll", || {
                let tracker = Arc::clone(&tracker);
                async move { tracker.poll_once(Utc::now()).await }
            })
            .await;
            match outcome {
                Ok(summary) => {
                    tracing::debug!(?summary, "tracker poll");
                }
                Err(err) => warn!(error = %err, "tracker poll failed"),
            }
        }
    });

    let health = Arc::clone(&engines.health);
    let health_loop = tokio::spawn(async move {
        // Sweep frequently; each probe's own interval gates actual runs.
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = health.sweep(Utc::now()).await {
                warn!(error = %err, "health sweep failed");
            }
        }
    });

    info!("lnmtd running");
    wait_for_shutdown().await;
    info!("shutdown signal received, draining");

    tracker_loop.abort();
    health_loop.abort();
    engines.scheduler.shutdown(DRAIN_GRACE).await;
    handle.stopped().await;
    info!("lnmtd stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
