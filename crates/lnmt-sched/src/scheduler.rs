//! The scheduler: registration, admission, dispatch, retry, drain.
//!
//! One ticker task wakes at each minute boundary (and at pending retry
//! deadlines) and calls [`Scheduler::tick_at`]; worker concurrency is a
//! semaphore sized by `max_workers`. Jobs admitted while the pool is
//! saturated are simply re-evaluated next tick, so there is no queue to
//! grow without bound.
//!
//! [`Scheduler`] is a cheap cloneable handle over shared state, the same
//! shape as the event bus: subsystems and the CLI clone it freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use lnmt_core::{JobId, RunId};
use lnmt_events::{EventBus, LnmtEvent};
use lnmt_store::{AuditEvent, AuditLog};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SchedError, SchedResult};
use crate::registry::{JobContext, JobFnRegistry, RESERVED_TARGET};
use crate::storage::SchedStorage;
use crate::types::{Job, JobRun, Priority, RunStatus, Trigger};

/// A retry waiting for its backoff deadline.
#[derive(Debug, Clone)]
struct RetryEntry {
    due: DateTime<Utc>,
    job_id: JobId,
    retry_count: u32,
    /// The RETRYING predecessor row, finalized to FAILED when this
    /// attempt starts.
    predecessor: JobRun,
}

/// A run currently owned by a worker task.
#[derive(Debug, Clone)]
struct InFlight {
    job_id: JobId,
    run_id: RunId,
}

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    /// Civil minute (in the scheduler timezone) last evaluated, so a
    /// doubled local minute across a DST fall-back fires once.
    last_fired_minute: Option<String>,
    next_tick: Option<DateTime<Utc>>,
    retry_queue: Vec<RetryEntry>,
    in_flight: HashMap<RunId, InFlight>,
    /// Jobs admitted but deferred by pool saturation at the last tick,
    /// bucketed by priority.
    deferred: HashMap<Priority, usize>,
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    /// Whether the ticker loop is running.
    pub running: bool,
    /// Next minute boundary the ticker will evaluate.
    pub next_tick: Option<DateTime<Utc>>,
    /// Runs currently executing.
    pub in_flight: usize,
    /// Jobs deferred by saturation at the last tick, per priority.
    pub deferred: HashMap<String, usize>,
    /// Retries waiting for their backoff deadline.
    pub pending_retries: usize,
}

struct SchedulerCore {
    storage: SchedStorage,
    functions: JobFnRegistry,
    events: EventBus,
    audit: AuditLog,
    timezone: Tz,
    workers: Arc<Semaphore>,
    max_workers: usize,
    inner: Mutex<Inner>,
    idle: Notify,
    shutdown: CancellationToken,
}

/// The job scheduler and execution engine.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        storage: SchedStorage,
        functions: JobFnRegistry,
        events: EventBus,
        audit: AuditLog,
        timezone: Tz,
        max_workers: usize,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            core: Arc::new(SchedulerCore {
                storage,
                functions,
                events,
                audit,
                timezone,
                workers: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                inner: Mutex::new(Inner::default()),
                idle: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // -- registry operations ------------------------------------------------

    /// Register a job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidParameters`], [`SchedError::ReservedTarget`],
    /// [`SchedError::UnknownTarget`], [`SchedError::DuplicateId`],
    /// [`SchedError::UnknownDependency`], or [`SchedError::CycleDetected`].
    pub fn register(&self, actor: &str, job: Job) -> SchedResult<()> {
        let core = &self.core;
        core.validate_registration(&job)?;
        if core.storage.get_job(&job.id)?.is_some() {
            return Err(SchedError::DuplicateId {
                job_id: job.id.clone(),
            });
        }
        core.storage.put_job(&job)?;
        core.record(actor, "job_register", job.id.as_str(), true, "");
        info!(job_id = %job.id, schedule = %job.schedule, "job registered");
        Ok(())
    }

    /// Register a job, replacing an existing definition with the same id.
    ///
    /// The original `created_at` is preserved on replacement. Used by
    /// explicit re-import; everyday registration goes through
    /// [`Scheduler::register`].
    ///
    /// # Errors
    ///
    /// Same conditions as [`Scheduler::register`], minus the duplicate
    /// check.
    pub fn upsert(&self, actor: &str, mut job: Job) -> SchedResult<()> {
        let core = &self.core;
        match core.storage.get_job(&job.id)? {
            None => self.register(actor, job),
            Some(existing) => {
                core.validate_registration(&job)?;
                job.created_at = existing.created_at;
                job.updated_at = Utc::now();
                core.storage.put_job(&job)?;
                core.record(actor, "job_replace", job.id.as_str(), true, "");
                Ok(())
            }
        }
    }

    /// Remove a job. History is retained.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::UnknownJob`] or, while a run is in flight,
    /// [`SchedError::AlreadyRunning`].
    pub fn unregister(&self, actor: &str, job_id: &JobId) -> SchedResult<()> {
        let core = &self.core;
        if core.storage.get_job(job_id)?.is_none() {
            return Err(SchedError::UnknownJob {
                job_id: job_id.clone(),
            });
        }
        if core.storage.running_run(job_id)?.is_some() {
            return Err(SchedError::AlreadyRunning {
                job_id: job_id.clone(),
            });
        }
        core.storage.delete_job(job_id)?;
        core.inner().retry_queue.retain(|entry| &entry.job_id != job_id);
        core.record(actor, "job_unregister", job_id.as_str(), true, "");
        Ok(())
    }

    /// Enable a job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::UnknownJob`].
    pub fn enable(&self, actor: &str, job_id: &JobId) -> SchedResult<()> {
        self.core.set_enabled(actor, job_id, true)
    }

    /// Disable a job. A RUNNING run is not cancelled; future scheduling
    /// stops.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::UnknownJob`].
    pub fn disable(&self, actor: &str, job_id: &JobId) -> SchedResult<()> {
        self.core.set_enabled(actor, job_id, false)
    }

    /// All registered jobs, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn jobs(&self) -> SchedResult<Vec<Job>> {
        Ok(self.core.storage.list_jobs()?)
    }

    /// Fetch one job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::UnknownJob`].
    pub fn job(&self, job_id: &JobId) -> SchedResult<Job> {
        self.core.require_job(job_id)
    }

    /// Recent run history, newest first. `limit` of zero means unlimited.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn history(&self, job_id: Option<&JobId>, limit: usize) -> SchedResult<Vec<JobRun>> {
        Ok(self.core.storage.history(job_id, limit)?)
    }

    /// Scheduler status snapshot.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn status(&self) -> SchedResult<SchedulerStatus> {
        let inner = self.core.inner();
        Ok(SchedulerStatus {
            running: inner.running,
            next_tick: inner.next_tick,
            in_flight: inner.in_flight.len(),
            deferred: inner
                .deferred
                .iter()
                .map(|(priority, count)| (priority.to_string(), *count))
                .collect(),
            pending_retries: inner.retry_queue.len(),
        })
    }

    /// Drop run history older than `retention_days`. Returns rows removed.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn prune_history(&self, retention_days: u32, now: DateTime<Utc>) -> SchedResult<usize> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        Ok(self.core.storage.prune_runs(cutoff)?)
    }

    // -- manual runs --------------------------------------------------------

    /// Enqueue a manual run of `job_id` and return its (pending) run row.
    ///
    /// Manual runs do not transitively trigger dependencies: if the
    /// dependency gate is not satisfied in the current window, the call
    /// fails instead of running the dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::UnknownJob`], [`SchedError::DependencyUnsatisfied`],
    /// or [`SchedError::AlreadyRunning`].
    pub fn run_now(&self, actor: &str, job_id: &JobId) -> SchedResult<JobRun> {
        let core = &self.core;
        let job = core.require_job(job_id)?;
        let now = Utc::now();

        if !core.dependencies_satisfied(&job, now)? {
            core.record(actor, "job_run_now", job_id.as_str(), false, "dependency gate");
            return Err(SchedError::DependencyUnsatisfied {
                job_id: job_id.clone(),
            });
        }

        let run = JobRun::pending(job.id.clone(), Trigger::Manual, 0, now);
        if !core.storage.try_acquire_running(&job.id, run.run_id)? {
            core.record(actor, "job_run_now", job_id.as_str(), false, "already running");
            return Err(SchedError::AlreadyRunning {
                job_id: job_id.clone(),
            });
        }
        core.storage.put_run(&run)?;
        core.track_in_flight(&run);
        core.record(actor, "job_run_now", job_id.as_str(), true, "");

        // Manual runs wait for a pool slot rather than being dropped.
        let spawned_core = Arc::clone(core);
        let spawned_run = run.clone();
        tokio::spawn(async move {
            let Ok(permit) = Arc::clone(&spawned_core.workers).acquire_owned().await else {
                return;
            };
            spawned_core.execute(job, spawned_run, permit).await;
        });
        Ok(run)
    }

    // -- tick ---------------------------------------------------------------

    /// Evaluate one scheduler instant: fire due retries, and when `now`
    /// enters a new civil minute, evaluate every enabled job's cron
    /// expression, gate on dependencies, and dispatch.
    ///
    /// The production ticker calls this; tests drive it directly with a
    /// simulated clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if job enumeration fails; per-job failures
    /// are logged and isolated.
    pub fn tick_at(&self, now: DateTime<Utc>) -> SchedResult<()> {
        let core = &self.core;
        self.dispatch_due_retries(now);

        let civil = now.with_timezone(&core.timezone);
        let minute_key = civil.format("%Y-%m-%d %H:%M").to_string();
        {
            let mut inner = core.inner();
            if inner.last_fired_minute.as_deref() == Some(minute_key.as_str()) {
                return Ok(());
            }
            inner.last_fired_minute = Some(minute_key);
            inner.next_tick = Some(next_minute(now));
            inner.deferred.clear();
        }

        let jobs = core.storage.list_jobs()?;
        let mut matched: Vec<&Job> = jobs
            .iter()
            .filter(|job| job.enabled && job.schedule.matches(&civil))
            .collect();

        // Deterministic dispatch order: priority desc, then id asc. Every
        // match this tick shares the same next-run instant, so the id is
        // the effective tiebreak.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        for job in matched {
            match self.admit_and_dispatch(job, now) {
                Ok(()) => {}
                Err(err) => {
                    // One job's failure never stops the tick.
                    warn!(job_id = %job.id, error = %err, "dispatch failed");
                }
            }
        }
        Ok(())
    }

    fn admit_and_dispatch(&self, job: &Job, now: DateTime<Utc>) -> SchedResult<()> {
        let core = &self.core;
        if core.storage.running_run(&job.id)?.is_some() {
            debug!(job_id = %job.id, "skipped: already running");
            return Ok(());
        }
        if core
            .inner()
            .retry_queue
            .iter()
            .any(|entry| entry.job_id == job.id)
        {
            debug!(job_id = %job.id, "skipped: retry pending");
            return Ok(());
        }
        if !core.dependencies_satisfied(job, now)? {
            debug!(job_id = %job.id, "skipped: dependency gate");
            return Ok(());
        }

        let Ok(permit) = Arc::clone(&core.workers).try_acquire_owned() else {
            // Pool saturated: stays pending, re-evaluated next tick.
            *core.inner().deferred.entry(job.priority).or_insert(0) += 1;
            return Ok(());
        };

        self.dispatch(job.clone(), Trigger::Schedule, 0, permit, now)
    }

    fn dispatch(
        &self,
        job: Job,
        trigger: Trigger,
        retry_count: u32,
        permit: OwnedSemaphorePermit,
        now: DateTime<Utc>,
    ) -> SchedResult<()> {
        let core = &self.core;
        let run = JobRun::pending(job.id.clone(), trigger, retry_count, now);
        if !core.storage.try_acquire_running(&job.id, run.run_id)? {
            return Ok(());
        }
        core.storage.put_run(&run)?;
        core.track_in_flight(&run);

        let spawned_core = Arc::clone(core);
        tokio::spawn(async move {
            spawned_core.execute(job, run, permit).await;
        });
        Ok(())
    }

    fn dispatch_due_retries(&self, now: DateTime<Utc>) {
        let core = &self.core;
        let due: Vec<RetryEntry> = {
            let mut inner = core.inner();
            let (due, pending): (Vec<_>, Vec<_>) = inner
                .retry_queue
                .drain(..)
                .partition(|entry| entry.due <= now);
            inner.retry_queue = pending;
            due
        };

        for entry in due {
            // Finalize the RETRYING predecessor now that its retry starts.
            let mut predecessor = entry.predecessor.clone();
            if predecessor.transition(RunStatus::Failed, now).is_ok() {
                if let Err(err) = core.storage.put_run(&predecessor) {
                    warn!(job_id = %entry.job_id, error = %err, "failed to finalize retried run");
                }
            }

            let job = match core.storage.get_job(&entry.job_id) {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(err) => {
                    warn!(job_id = %entry.job_id, error = %err, "retry lookup failed");
                    continue;
                }
            };
            if !job.enabled {
                continue;
            }

            let Ok(permit) = Arc::clone(&core.workers).try_acquire_owned() else {
                // No slot: push the retry back and try next tick.
                core.inner().retry_queue.push(entry);
                continue;
            };
            if let Err(err) = self.dispatch(job, Trigger::Retry, entry.retry_count, permit, now) {
                warn!(job_id = %entry.job_id, error = %err, "retry dispatch failed");
            }
        }
    }

    // -- loop and drain -----------------------------------------------------

    /// Start the ticker loop.
    pub fn start(&self) -> SchedulerHandle {
        let core = &self.core;
        {
            let mut inner = core.inner();
            inner.running = true;
            inner.next_tick = Some(next_minute(Utc::now()));
        }
        core.events.publish(LnmtEvent::SchedulerStarted {
            workers: core.max_workers,
        });
        info!(workers = core.max_workers, timezone = %core.timezone, "scheduler started");

        let scheduler = self.clone();
        let join = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let wake = scheduler.core.next_wake(now);
                let sleep = (wake - now).to_std().unwrap_or(StdDuration::ZERO);
                tokio::select! {
                    () = tokio::time::sleep(sleep) => {}
                    () = scheduler.core.shutdown.cancelled() => break,
                }
                if let Err(err) = scheduler.tick_at(Utc::now()) {
                    warn!(error = %err, "tick failed");
                }
            }
        });
        SchedulerHandle { join }
    }

    /// Graceful drain: stop dispatching, signal cancellation, wait up to
    /// `grace` for in-flight runs, then mark survivors CANCELLED.
    pub async fn shutdown(&self, grace: StdDuration) {
        self.core.shutdown_and_drain(grace).await;
    }

    /// Wait until no runs are in flight. For tests and drain.
    pub async fn await_idle(&self) {
        self.core.await_idle().await;
    }

    /// The storage handle (read-side access for CLI and API layers).
    #[must_use]
    pub fn storage(&self) -> &SchedStorage {
        &self.core.storage
    }

    /// The function registry jobs resolve their targets against.
    #[must_use]
    pub fn functions(&self) -> &JobFnRegistry {
        &self.core.functions
    }
}

impl SchedulerCore {
    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The inner mutex is never held across await points, so a
        // poisoned lock means a panic mid-update; propagating the old
        // state is the least-bad recovery.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Shared registration checks; the duplicate check lives with the
    /// callers.
    fn validate_registration(&self, job: &Job) -> SchedResult<()> {
        job.check_parameters()?;
        if job.target == RESERVED_TARGET {
            return Err(SchedError::ReservedTarget {
                target: job.target.clone(),
            });
        }
        if !self.functions.contains(&job.target) {
            return Err(SchedError::UnknownTarget {
                target: job.target.clone(),
            });
        }
        let existing = self.storage.list_jobs()?;
        for dependency in &job.dependencies {
            if dependency != &job.id && !existing.iter().any(|j| &j.id == dependency) {
                return Err(SchedError::UnknownDependency {
                    job_id: job.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        detect_cycles(&existing, job)
    }

    fn set_enabled(&self, actor: &str, job_id: &JobId, enabled: bool) -> SchedResult<()> {
        let mut job = self.require_job(job_id)?;
        job.enabled = enabled;
        job.updated_at = Utc::now();
        self.storage.put_job(&job)?;
        let action = if enabled { "job_enable" } else { "job_disable" };
        self.record(actor, action, job_id.as_str(), true, "");
        Ok(())
    }

    /// In-flight bookkeeping happens before the worker task spawns, so
    /// `await_idle` cannot observe an empty map between dispatch and task
    /// startup.
    fn track_in_flight(&self, run: &JobRun) {
        self.inner().in_flight.insert(
            run.run_id,
            InFlight {
                job_id: run.job_id.clone(),
                run_id: run.run_id,
            },
        );
    }

    fn dependencies_satisfied(&self, job: &Job, now: DateTime<Utc>) -> SchedResult<bool> {
        if job.dependencies.is_empty() {
            return Ok(true);
        }
        // A dependency counts when it completed within the current tick
        // window or the one before it.
        let minute_start = truncate_to_minute(now);
        let window_start = minute_start - Duration::seconds(60);
        let window_end = minute_start + Duration::seconds(60);

        for dependency in &job.dependencies {
            let Some(run) = self.storage.latest_completed(dependency)? else {
                return Ok(false);
            };
            let Some(ended_at) = run.ended_at else {
                return Ok(false);
            };
            if ended_at < window_start || ended_at >= window_end {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -- execution ----------------------------------------------------------

    async fn execute(self: Arc<Self>, job: Job, mut run: JobRun, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        let started = Utc::now();

        if let Err(err) = run.transition(RunStatus::Running, started) {
            error!(job_id = %job.id, error = %err, "run rejected");
            let _ = self.storage.release_running(&job.id, run.run_id);
            self.inner().in_flight.remove(&run.run_id);
            self.idle.notify_waiters();
            return;
        }
        if let Err(err) = self.storage.put_run(&run) {
            warn!(job_id = %job.id, error = %err, "run row write failed");
        }

        let cancel = self.shutdown.child_token();
        let outcome = self.invoke_body(&job, &run, cancel).await;
        self.finalize(job, run, outcome).await;
    }

    async fn invoke_body(
        &self,
        job: &Job,
        run: &JobRun,
        cancel: CancellationToken,
    ) -> ExecOutcome {
        let Some(body) = self.functions.get(&job.target) else {
            return ExecOutcome::Error(format!("target not registered: {}", job.target));
        };
        let ctx = JobContext {
            job_id: job.id.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            cancel: cancel.clone(),
        };
        let timeout = StdDuration::from_secs(u64::from(job.timeout_s));

        tokio::select! {
            // Biased so a shutdown signal beats a simultaneously-ready
            // body: drain must observe CANCELLED, not a photo-finish
            // completion.
            biased;
            () = self.shutdown.cancelled() => {
                cancel.cancel();
                ExecOutcome::Cancelled
            }
            result = tokio::time::timeout(timeout, body.run(ctx)) => match result {
                Ok(Ok(output)) => ExecOutcome::Success(output),
                Ok(Err(message)) => ExecOutcome::Error(message),
                Err(_) => {
                    // Hard deadline: ask the body to stop and abandon it.
                    // A non-cooperative body may keep consuming resources;
                    // the pool slot is reclaimed regardless.
                    cancel.cancel();
                    warn!(job_id = %job.id, run_id = %run.run_id, timeout_s = job.timeout_s, "run timed out");
                    ExecOutcome::Error("timeout".to_owned())
                }
            },
        }
    }

    async fn finalize(&self, job: Job, mut run: JobRun, outcome: ExecOutcome) {
        let now = Utc::now();
        self.inner().in_flight.remove(&run.run_id);

        // The drain path may have finalized this run already.
        let stale = match self.storage.history(Some(&job.id), 0) {
            Ok(runs) => runs
                .iter()
                .find(|r| r.run_id == run.run_id)
                .is_some_and(|r| r.status.is_terminal()),
            Err(_) => false,
        };

        if !stale {
            let result = match outcome {
                ExecOutcome::Success(output) => {
                    run.set_output(output);
                    run.transition(RunStatus::Completed, now)
                }
                ExecOutcome::Cancelled => run.transition(RunStatus::Cancelled, now),
                ExecOutcome::Error(message) => {
                    run.error = Some(message);
                    if run.retry_count < job.max_retries {
                        let delay = retry_delay(&job, run.retry_count);
                        // The deadline counts from the attempt's start so
                        // the backoff curve is anchored to the schedule,
                        // not to how long the failing body took.
                        let due = run.started_at + delay;
                        let transition = run.transition(RunStatus::Retrying, now);
                        if transition.is_ok() {
                            self.inner().retry_queue.push(RetryEntry {
                                due,
                                job_id: job.id.clone(),
                                retry_count: run.retry_count + 1,
                                predecessor: run.clone(),
                            });
                            debug!(job_id = %job.id, retry = run.retry_count + 1, ?delay, "retry scheduled");
                        }
                        transition
                    } else {
                        run.transition(RunStatus::Failed, now)
                    }
                }
            };
            match result {
                Ok(()) => {
                    if let Err(err) = self.storage.put_run(&run) {
                        warn!(job_id = %job.id, error = %err, "run row write failed");
                    }
                }
                Err(err) => error!(job_id = %job.id, error = %err, "run rejected"),
            }
        }

        if let Err(err) = self.storage.release_running(&job.id, run.run_id) {
            warn!(job_id = %job.id, error = %err, "running marker release failed");
        }
        self.events.publish(LnmtEvent::JobRunFinished {
            job_id: job.id,
            run_id: run.run_id,
            status: run.status.to_string().to_lowercase(),
        });
        self.idle.notify_waiters();
    }

    /// Earliest of the next minute boundary and the soonest retry deadline.
    fn next_wake(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tick = next_minute(now);
        let retry = self
            .inner()
            .retry_queue
            .iter()
            .map(|entry| entry.due)
            .min();
        match retry {
            Some(due) if due < tick => due.max(now),
            _ => tick,
        }
    }

    async fn shutdown_and_drain(&self, grace: StdDuration) {
        {
            let mut inner = self.inner();
            inner.running = false;
        }
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        while !self.inner().in_flight.is_empty() {
            if tokio::time::timeout_at(deadline, self.idle.notified())
                .await
                .is_err()
            {
                break;
            }
        }

        let survivors: Vec<InFlight> = self.inner().in_flight.drain().map(|(_, v)| v).collect();
        let cancelled = survivors.len();
        let now = Utc::now();
        for survivor in survivors {
            warn!(job_id = %survivor.job_id, run_id = %survivor.run_id, "run abandoned at shutdown");
            if let Ok(runs) = self.storage.history(Some(&survivor.job_id), 0) {
                if let Some(mut run) = runs.into_iter().find(|r| r.run_id == survivor.run_id) {
                    if !run.status.is_terminal() && run.transition(RunStatus::Cancelled, now).is_ok()
                    {
                        let _ = self.storage.put_run(&run);
                    }
                }
            }
            let _ = self.storage.release_running(&survivor.job_id, survivor.run_id);
        }

        self.events
            .publish(LnmtEvent::SchedulerStopped { cancelled_runs: cancelled });
        info!(cancelled, "scheduler stopped");
    }

    async fn await_idle(&self) {
        loop {
            if self.inner().in_flight.is_empty() {
                return;
            }
            self.idle.notified().await;
        }
    }

    fn require_job(&self, job_id: &JobId) -> SchedResult<Job> {
        self.storage
            .get_job(job_id)?
            .ok_or_else(|| SchedError::UnknownJob {
                job_id: job_id.clone(),
            })
    }

    fn record(&self, actor: &str, action: &str, target: &str, success: bool, details: &str) {
        let event = AuditEvent::now(actor, action, target, success, details);
        if let Err(err) = self.audit.record(&event) {
            warn!(action, error = %err, "audit write failed");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_workers", &self.core.max_workers)
            .field("timezone", &self.core.timezone)
            .finish_non_exhaustive()
    }
}

/// Handle to the ticker task.
#[derive(Debug)]
pub struct SchedulerHandle {
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for the ticker task to exit (after [`Scheduler::shutdown`]).
    pub async fn stopped(self) {
        let _ = self.join.await;
    }
}

enum ExecOutcome {
    Success(String),
    Error(String),
    Cancelled,
}

fn retry_delay(job: &Job, retry_count: u32) -> Duration {
    let base = u64::from(job.retry_delay_s);
    let factor = 2u64.saturating_pow(retry_count);
    // Backoff doubles per retry, capped at the job's timeout.
    let capped = base.saturating_mul(factor).min(u64::from(job.timeout_s));
    Duration::seconds(i64::try_from(capped).unwrap_or(i64::MAX))
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn next_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(at) + Duration::seconds(60)
}

/// Reject a registration that would close a dependency cycle. Kahn's
/// topological sort over the id-keyed adjacency map; ids, never pointers.
pub(crate) fn detect_cycles(existing: &[Job], new_job: &Job) -> SchedResult<()> {
    use std::collections::{BTreeMap, BTreeSet, VecDeque};

    let mut deps: BTreeMap<&JobId, BTreeSet<&JobId>> = BTreeMap::new();
    for job in existing.iter().filter(|j| j.id != new_job.id) {
        deps.insert(&job.id, job.dependencies.iter().collect());
    }
    deps.insert(&new_job.id, new_job.dependencies.iter().collect());

    // Edges to unregistered jobs cannot close a cycle; drop them.
    let ids: BTreeSet<&JobId> = deps.keys().copied().collect();
    for targets in deps.values_mut() {
        targets.retain(|t| ids.contains(t));
    }

    let mut in_degree: BTreeMap<&JobId, usize> = ids.iter().map(|id| (*id, 0)).collect();
    for targets in deps.values() {
        for target in targets {
            if let Some(degree) = in_degree.get_mut(target) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<&JobId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(targets) = deps.get(id) {
            for target in targets {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    if visited < ids.len() {
        return Err(SchedError::CycleDetected {
            job_id: new_job.id.clone(),
        });
    }
    Ok(())
}
