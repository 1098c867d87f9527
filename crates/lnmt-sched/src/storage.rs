//! Typed scheduler storage over the key-value store.
//!
//! Jobs live in the configuration tier, runs in the operational tier.
//! The "at most one RUNNING run per job" invariant is a compare-and-swap
//! on a per-job marker key, so it holds across tasks without any
//! application-level lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lnmt_core::{JobId, RunId};
use lnmt_store::{KvStore, StoreError, StoreResult};

use crate::types::{Job, JobRun};

const NS_JOBS: &str = "sched:jobs";
const NS_RUNS: &str = "sched:runs";
const NS_RUNNING: &str = "sched:running";

/// Scheduler rows in the store.
#[derive(Clone)]
pub struct SchedStorage {
    store: Arc<dyn KvStore>,
}

impl SchedStorage {
    /// Create storage over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // -- jobs ---------------------------------------------------------------

    /// Fetch a job definition.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        match self.store.get(NS_JOBS, job_id.as_str())? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Insert or update a job definition.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if persistence fails.
    pub fn put_job(&self, job: &Job) -> StoreResult<()> {
        let raw = serde_json::to_vec(job).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(NS_JOBS, job.id.as_str(), raw)
    }

    /// Remove a job definition. History is retained.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn delete_job(&self, job_id: &JobId) -> StoreResult<()> {
        self.store.delete(NS_JOBS, job_id.as_str())
    }

    /// All job definitions, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for key in self.store.list_keys(NS_JOBS)? {
            if let Some(raw) = self.store.get(NS_JOBS, &key)? {
                jobs.push(
                    serde_json::from_slice(&raw)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                );
            }
        }
        Ok(jobs)
    }

    // -- runs ---------------------------------------------------------------

    /// Run rows key by start time then run id, so a plain key scan yields
    /// total `started_at` order with the documented tiebreak.
    fn run_key(run: &JobRun) -> String {
        format!(
            "{:020}:{}",
            run.started_at.timestamp_micros().max(0),
            run.run_id
        )
    }

    /// Insert or update a run row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if persistence fails.
    pub fn put_run(&self, run: &JobRun) -> StoreResult<()> {
        let raw = serde_json::to_vec(run).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(NS_RUNS, &Self::run_key(run), raw)
    }

    /// Most recent runs, newest first, optionally filtered by job.
    /// `limit` of zero means unlimited.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn history(&self, job_id: Option<&JobId>, limit: usize) -> StoreResult<Vec<JobRun>> {
        let mut keys = self.store.list_keys(NS_RUNS)?;
        keys.reverse();

        let mut runs = Vec::new();
        for key in keys {
            let Some(raw) = self.store.get(NS_RUNS, &key)? else {
                continue;
            };
            let run: JobRun = serde_json::from_slice(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if let Some(job_id) = job_id {
                if &run.job_id != job_id {
                    continue;
                }
            }
            runs.push(run);
            if limit > 0 && runs.len() >= limit {
                break;
            }
        }
        Ok(runs)
    }

    /// Latest completed run of `job_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn latest_completed(&self, job_id: &JobId) -> StoreResult<Option<JobRun>> {
        for run in self.history(Some(job_id), 0)? {
            if run.status == crate::types::RunStatus::Completed {
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    /// Delete run rows started before `cutoff`. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn prune_runs(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff_key = format!("{:020}:", cutoff.timestamp_micros().max(0));
        let mut pruned = 0;
        for key in self.store.list_keys(NS_RUNS)? {
            if key.as_str() < cutoff_key.as_str() {
                self.store.delete(NS_RUNS, &key)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // -- running markers ----------------------------------------------------

    /// Try to mark `job_id` as running with `run_id`. Returns `false` if
    /// another run holds the marker.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn try_acquire_running(&self, job_id: &JobId, run_id: RunId) -> StoreResult<bool> {
        self.store.compare_and_swap(
            NS_RUNNING,
            job_id.as_str(),
            None,
            Some(run_id.to_string().into_bytes()),
        )
    }

    /// Release the running marker, but only if `run_id` still holds it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn release_running(&self, job_id: &JobId, run_id: RunId) -> StoreResult<bool> {
        self.store.compare_and_swap(
            NS_RUNNING,
            job_id.as_str(),
            Some(run_id.to_string().as_bytes()),
            None,
        )
    }

    /// The run currently holding the marker for `job_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn running_run(&self, job_id: &JobId) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .get(NS_RUNNING, job_id.as_str())?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Count of currently held running markers.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn running_count(&self) -> StoreResult<usize> {
        Ok(self.store.list_keys(NS_RUNNING)?.len())
    }
}

impl std::fmt::Debug for SchedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lnmt_store::MemoryKvStore;

    use crate::types::{RunStatus, Trigger};

    fn storage() -> SchedStorage {
        SchedStorage::new(Arc::new(MemoryKvStore::new()))
    }

    fn run_at(job: &str, offset_s: i64, base: DateTime<Utc>) -> JobRun {
        JobRun::pending(
            JobId::new(job),
            Trigger::Schedule,
            0,
            base + Duration::seconds(offset_s),
        )
    }

    #[test]
    fn test_history_newest_first_and_filtered() {
        let storage = storage();
        let base = Utc::now();
        storage.put_run(&run_at("a", 0, base)).unwrap();
        storage.put_run(&run_at("b", 1, base)).unwrap();
        storage.put_run(&run_at("a", 2, base)).unwrap();

        let all = storage.history(None, 0).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].started_at >= all[1].started_at);

        let a_only = storage.history(Some(&JobId::new("a")), 0).unwrap();
        assert_eq!(a_only.len(), 2);

        let limited = storage.history(None, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_running_marker_is_exclusive() {
        let storage = storage();
        let job = JobId::new("j");
        let first = RunId::new();
        let second = RunId::new();

        assert!(storage.try_acquire_running(&job, first).unwrap());
        assert!(!storage.try_acquire_running(&job, second).unwrap());

        // Only the holder can release.
        assert!(!storage.release_running(&job, second).unwrap());
        assert!(storage.release_running(&job, first).unwrap());
        assert!(storage.try_acquire_running(&job, second).unwrap());
    }

    #[test]
    fn test_prune_runs_by_cutoff() {
        let storage = storage();
        let base = Utc::now();
        storage.put_run(&run_at("a", -3600, base)).unwrap();
        storage.put_run(&run_at("a", 0, base)).unwrap();

        let pruned = storage.prune_runs(base - Duration::seconds(60)).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(storage.history(None, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_latest_completed_skips_failures() {
        let storage = storage();
        let base = Utc::now();
        let job = JobId::new("a");

        let mut failed = run_at("a", 0, base);
        failed.transition(RunStatus::Running, base).unwrap();
        failed.transition(RunStatus::Failed, base).unwrap();
        storage.put_run(&failed).unwrap();

        assert!(storage.latest_completed(&job).unwrap().is_none());

        let mut ok = run_at("a", 1, base);
        ok.transition(RunStatus::Running, base).unwrap();
        ok.transition(RunStatus::Completed, base).unwrap();
        storage.put_run(&ok).unwrap();

        let latest = storage.latest_completed(&job).unwrap().unwrap();
        assert_eq!(latest.run_id, ok.run_id);
    }
}
