//! Job definitions as a TOML document.
//!
//! The same shape serves the startup config file, `schedctl export`, and
//! `schedctl import`. Registration timestamps are not part of the
//! document; everything an operator writes by hand is.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use lnmt_core::JobId;
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::{SchedError, SchedResult};
use crate::scheduler::Scheduler;
use crate::types::{Job, Priority};

/// One job as written in a definitions file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct JobDefinition {
    /// Human-readable name.
    pub name: String,
    /// Function-registry target.
    pub target: String,
    /// Cron expression.
    pub schedule: CronExpr,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
    /// Retries after the first failure.
    #[serde(default)]
    pub max_retries: u32,
    /// Base retry delay in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_s: u32,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_s: u32,
    /// Ids of jobs that must complete first.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<String>,
    /// Whether the job is scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

fn default_retry_delay() -> u32 {
    60
}

fn default_timeout() -> u32 {
    300
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobsDocument {
    #[serde(default)]
    jobs: BTreeMap<String, JobDefinition>,
}

impl JobDefinition {
    fn from_job(job: &Job) -> Self {
        Self {
            name: job.name.clone(),
            target: job.target.clone(),
            schedule: job.schedule.clone(),
            priority: job.priority,
            max_retries: job.max_retries,
            retry_delay_s: job.retry_delay_s,
            timeout_s: job.timeout_s,
            dependencies: job.dependencies.iter().map(|d| d.0.clone()).collect(),
            enabled: job.enabled,
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
        }
    }

    fn into_job(self, id: &str) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(id),
            name: self.name,
            target: self.target,
            schedule: self.schedule,
            priority: self.priority,
            max_retries: self.max_retries,
            retry_delay_s: self.retry_delay_s,
            timeout_s: self.timeout_s,
            dependencies: self.dependencies.into_iter().map(JobId).collect(),
            enabled: self.enabled,
            args: self.args,
            kwargs: self.kwargs,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Render jobs as a definitions document.
///
/// # Errors
///
/// Returns [`SchedError::InvalidDefinitions`] if serialization fails.
pub fn export_jobs(jobs: &[Job]) -> SchedResult<String> {
    let document = JobsDocument {
        jobs: jobs
            .iter()
            .map(|job| (job.id.0.clone(), JobDefinition::from_job(job)))
            .collect(),
    };
    toml::to_string_pretty(&document).map_err(|e| SchedError::InvalidDefinitions(e.to_string()))
}

/// Parse a definitions document and register every job, dependencies
/// first. With `replace` set, existing ids are updated in place;
/// otherwise they fail with `DuplicateId`.
///
/// Returns the number of jobs applied.
///
/// # Errors
///
/// Returns the first registration error, or
/// [`SchedError::InvalidDefinitions`] for a document that does not parse
/// or whose dependencies cannot be ordered.
pub fn import_jobs(
    scheduler: &Scheduler,
    actor: &str,
    text: &str,
    replace: bool,
) -> SchedResult<usize> {
    let document: JobsDocument =
        toml::from_str(text).map_err(|e| SchedError::InvalidDefinitions(e.to_string()))?;

    let mut pending: BTreeMap<String, JobDefinition> = document.jobs;
    let mut applied = 0usize;

    // Register in dependency order: repeatedly take definitions whose
    // dependencies are already present. Cycles leave a remainder, which
    // registration would reject anyway; surface them as a document error.
    while !pending.is_empty() {
        let registered: BTreeSet<String> = scheduler
            .jobs()?
            .into_iter()
            .map(|job| job.id.0)
            .collect();
        let ready: Vec<String> = pending
            .iter()
            .filter(|(id, definition)| {
                definition
                    .dependencies
                    .iter()
                    .all(|dep| dep == *id || registered.contains(dep) || !pending.contains_key(dep))
            })
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() {
            let stuck: Vec<String> = pending.keys().cloned().collect();
            return Err(SchedError::InvalidDefinitions(format!(
                "dependency order unresolvable for: {}",
                stuck.join(", ")
            )));
        }

        for id in ready {
            if let Some(definition) = pending.remove(&id) {
                let job = definition.into_job(&id);
                if replace {
                    scheduler.upsert(actor, job)?;
                } else {
                    scheduler.register(actor, job)?;
                }
                applied += 1;
            }
        }
    }
    Ok(applied)
}

/// Check a definitions document without touching any registry: TOML
/// shape, cron expressions, parameter invariants, in-document
/// dependencies, and acyclicity.
///
/// Returns the number of definitions found.
///
/// # Errors
///
/// Returns the first violation as a [`SchedError`].
pub fn validate_definitions(text: &str) -> SchedResult<usize> {
    let document: JobsDocument =
        toml::from_str(text).map_err(|e| SchedError::InvalidDefinitions(e.to_string()))?;

    let jobs: Vec<Job> = document
        .jobs
        .into_iter()
        .map(|(id, definition)| definition.into_job(&id))
        .collect();

    for job in &jobs {
        job.check_parameters()?;
        for dependency in &job.dependencies {
            if dependency != &job.id && !jobs.iter().any(|j| &j.id == dependency) {
                return Err(SchedError::UnknownDependency {
                    job_id: job.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    if let Some(first) = jobs.first() {
        // The cycle check covers the whole document graph.
        crate::scheduler::detect_cycles(&jobs, first)?;
    }
    Ok(jobs.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use lnmt_events::EventBus;
    use lnmt_store::{AuditLog, MemoryKvStore};

    use crate::registry::JobFnRegistry;
    use crate::storage::SchedStorage;

    fn scheduler() -> Scheduler {
        let store: Arc<dyn lnmt_store::KvStore> = Arc::new(MemoryKvStore::new());
        let functions = JobFnRegistry::new();
        functions
            .register_fn("noop", |_| async { Ok(String::new()) })
            .unwrap();
        Scheduler::new(
            SchedStorage::new(Arc::clone(&store)),
            functions,
            EventBus::new(),
            AuditLog::new(store),
            chrono_tz::Tz::UTC,
            5,
        )
    }

    fn sample_job(id: &str) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(id),
            name: format!("Job {id}"),
            target: "noop".to_owned(),
            schedule: "*/5 * * * *".parse().unwrap(),
            priority: Priority::High,
            max_retries: 2,
            retry_delay_s: 30,
            timeout_s: 120,
            dependencies: BTreeSet::new(),
            enabled: true,
            args: vec![serde_json::json!(7)],
            kwargs: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_export_import_roundtrip_is_fieldwise_equal() {
        let source = scheduler();
        let mut dependent = sample_job("b");
        dependent.dependencies.insert(JobId::new("a"));
        source.register("test", sample_job("a")).unwrap();
        source.register("test", dependent).unwrap();

        let exported = export_jobs(&source.jobs().unwrap()).unwrap();

        let target = scheduler();
        let applied = import_jobs(&target, "test", &exported, false).unwrap();
        assert_eq!(applied, 2);

        let mut original = source.jobs().unwrap();
        let mut imported = target.jobs().unwrap();
        original.sort_by(|x, y| x.id.cmp(&y.id));
        imported.sort_by(|x, y| x.id.cmp(&y.id));
        for (a, b) in original.iter().zip(imported.iter()) {
            assert_eq!(
                JobDefinition::from_job(a),
                JobDefinition::from_job(b),
                "definitions differ for {}",
                a.id
            );
        }
    }

    #[tokio::test]
    async fn test_import_orders_dependencies() {
        // "b" depends on "a" but sorts first in the document; import must
        // still succeed.
        let text = r#"
            [jobs.b]
            name = "B"
            target = "noop"
            schedule = "* * * * *"
            dependencies = ["a"]

            [jobs.a]
            name = "A"
            target = "noop"
            schedule = "* * * * *"
        "#;
        let target = scheduler();
        assert_eq!(import_jobs(&target, "test", text, false).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_without_replace() {
        let text = r#"
            [jobs.a]
            name = "A"
            target = "noop"
            schedule = "* * * * *"
        "#;
        let target = scheduler();
        import_jobs(&target, "test", text, false).unwrap();
        let err = import_jobs(&target, "test", text, false).unwrap_err();
        assert!(matches!(err, SchedError::DuplicateId { .. }));
        // Replace mode updates in place.
        assert_eq!(import_jobs(&target, "test", text, true).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_schedule() {
        let text = r#"
            [jobs.a]
            name = "A"
            target = "noop"
            schedule = "not cron"
        "#;
        let target = scheduler();
        let err = import_jobs(&target, "test", text, false).unwrap_err();
        assert!(matches!(err, SchedError::InvalidDefinitions(_)));
    }
}
