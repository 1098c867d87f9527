//! The job function registry.
//!
//! Jobs reference their body by a stable name. Each subsystem registers
//! its functions at startup; registering a job whose target is absent is
//! a registration-time error, and the reserved name `__main__` is
//! rejected outright rather than emulating ambient-module semantics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lnmt_core::JobId;
use tokio_util::sync::CancellationToken;

use crate::error::{SchedError, SchedResult};

/// Name no target may bind to.
pub(crate) const RESERVED_TARGET: &str = "__main__";

/// Result of one job body invocation: captured output on success, error
/// text on failure.
pub type JobOutcome = Result<String, String>;

/// Invocation context handed to a job body.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The job being run.
    pub job_id: JobId,
    /// Positional arguments from the job definition.
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments from the job definition.
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// Cancelled on shutdown and hard timeout. Long-running bodies should
    /// poll it; the scheduler abandons bodies that do not.
    pub cancel: CancellationToken,
}

/// A job body.
#[async_trait]
pub trait JobFn: Send + Sync {
    /// Execute the body.
    async fn run(&self, ctx: JobContext) -> JobOutcome;
}

type BoxedJobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;

/// Adapter turning an async closure into a [`JobFn`].
pub struct FnJob<F>(F);

impl<F> FnJob<F>
where
    F: Fn(JobContext) -> BoxedJobFuture + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> JobFn for FnJob<F>
where
    F: Fn(JobContext) -> BoxedJobFuture + Send + Sync,
{
    async fn run(&self, ctx: JobContext) -> JobOutcome {
        (self.0)(ctx).await
    }
}

/// Process-wide map from target name to job body.
#[derive(Clone, Default)]
pub struct JobFnRegistry {
    functions: Arc<RwLock<HashMap<String, Arc<dyn JobFn>>>>,
}

impl JobFnRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body under `name`, replacing any previous binding.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ReservedTarget`] for `__main__`.
    pub fn register(&self, name: &str, body: Arc<dyn JobFn>) -> SchedResult<()> {
        if name == RESERVED_TARGET {
            return Err(SchedError::ReservedTarget {
                target: name.to_owned(),
            });
        }
        if let Ok(mut functions) = self.functions.write() {
            functions.insert(name.to_owned(), body);
        }
        Ok(())
    }

    /// Register an async closure under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ReservedTarget`] for `__main__`.
    pub fn register_fn<F, Fut>(&self, name: &str, f: F) -> SchedResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(FnJob::new(move |ctx| Box::pin(f(ctx)) as BoxedJobFuture)),
        )
    }

    /// Look up a body.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobFn>> {
        self.functions
            .read()
            .ok()
            .and_then(|functions| functions.get(name).cloned())
    }

    /// Whether `name` resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .is_ok_and(|functions| functions.contains_key(name))
    }
}

impl std::fmt::Debug for JobFnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.functions.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("JobFnRegistry")
            .field("functions", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = JobFnRegistry::new();
        registry
            .register_fn("echo", |ctx| async move {
                Ok(format!("ran {}", ctx.job_id))
            })
            .unwrap();

        let body = registry.get("echo").unwrap();
        let outcome = body
            .run(JobContext {
                job_id: JobId::new("j1"),
                args: Vec::new(),
                kwargs: serde_json::Map::new(),
                cancel: CancellationToken::new(),
            })
            .await;
        assert_eq!(outcome.unwrap(), "ran j1");
    }

    #[test]
    fn test_reserved_target_rejected() {
        let registry = JobFnRegistry::new();
        let err = registry
            .register_fn("__main__", |_| async { Ok(String::new()) })
            .unwrap_err();
        assert!(matches!(err, SchedError::ReservedTarget { .. }));
    }

    #[test]
    fn test_unknown_lookup() {
        let registry = JobFnRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
    }
}
