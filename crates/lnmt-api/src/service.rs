//! The endpoint methods.

use std::sync::Arc;

use lnmt_auth::{AuthEngine, Role, SessionToken, ValidatedSession};
use lnmt_core::{JobId, MacAddr};
use lnmt_health::{HealthMonitor, HealthStatus};
use lnmt_sched::{Job, JobRun, Scheduler, SchedulerStatus};
use lnmt_tracker::{DeviceFilter, DeviceTracker, ThresholdBreach};
use tracing::instrument;

use crate::dto::{
    CreateJobRequest, DeviceHistoryResponse, HealthResponse, LoginRequest, LoginResponse, UserDto,
};
use crate::error::{ApiError, ApiResult};

/// The transport-agnostic API surface.
///
/// One method per endpoint; the HTTP layer passes the raw bearer token
/// string and the deserialized body.
pub struct ApiService {
    auth: Arc<AuthEngine>,
    scheduler: Scheduler,
    tracker: Arc<DeviceTracker>,
    health: Arc<HealthMonitor>,
}

impl ApiService {
    /// Wire the service to the four engines.
    #[must_use]
    pub fn new(
        auth: Arc<AuthEngine>,
        scheduler: Scheduler,
        tracker: Arc<DeviceTracker>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            auth,
            scheduler,
            tracker,
            health,
        }
    }

    fn caller(&self, bearer: &str, required: Role) -> ApiResult<ValidatedSession> {
        let token = SessionToken(bearer.trim().to_owned());
        if token.as_str().is_empty() {
            return Err(ApiError::unauthenticated());
        }
        let session = self.auth.validate(&token)?;
        self.auth.verify_role(&session, required)?;
        Ok(session)
    }

    // -- auth ---------------------------------------------------------------

    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// Maps credential, lockout, and store failures to wire errors.
    #[instrument(skip_all, fields(username = %request.username))]
    pub fn login(&self, request: &LoginRequest) -> ApiResult<LoginResponse> {
        let session = self
            .auth
            .login(&request.username, &request.password, request.remember_me)?;
        Ok(LoginResponse {
            token: session.token.as_str().to_owned(),
            expires_in: (session.expires_at - session.issued_at).num_seconds(),
            user: UserDto {
                username: session.username,
                role: session.role,
            },
        })
    }

    /// `POST /auth/logout`.
    ///
    /// # Errors
    ///
    /// Fails for unknown tokens.
    pub fn logout(&self, bearer: &str) -> ApiResult<()> {
        Ok(self.auth.logout(&SessionToken(bearer.trim().to_owned()))?)
    }

    /// `POST /auth/refresh`.
    ///
    /// # Errors
    ///
    /// Fails for unknown, revoked, or expired tokens.
    pub fn refresh(&self, bearer: &str) -> ApiResult<LoginResponse> {
        let session = self.auth.refresh(&SessionToken(bearer.trim().to_owned()))?;
        Ok(LoginResponse {
            token: session.token.as_str().to_owned(),
            expires_in: (session.expires_at - session.issued_at).num_seconds(),
            user: UserDto {
                username: session.username,
                role: session.role,
            },
        })
    }

    // -- scheduler ----------------------------------------------------------

    /// `GET /scheduler/jobs`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn list_jobs(&self, bearer: &str) -> ApiResult<Vec<Job>> {
        self.caller(bearer, Role::Viewer)?;
        Ok(self.scheduler.jobs()?)
    }

    /// `POST /scheduler/jobs`.
    ///
    /// # Errors
    ///
    /// Requires operator role; surfaces registration failures.
    pub fn create_job(&self, bearer: &str, request: CreateJobRequest) -> ApiResult<Job> {
        let caller = self.caller(bearer, Role::Operator)?;
        let job: Job = request.into();
        self.scheduler.register(&caller.username, job.clone())?;
        Ok(job)
    }

    /// `DELETE /scheduler/jobs/{id}`.
    ///
    /// # Errors
    ///
    /// Requires admin role; fails for unknown or running jobs.
    pub fn delete_job(&self, bearer: &str, job_id: &str) -> ApiResult<()> {
        let caller = self.caller(bearer, Role::Admin)?;
        Ok(self
            .scheduler
            .unregister(&caller.username, &JobId::new(job_id))?)
    }

    /// `POST /scheduler/jobs/{id}/run`.
    ///
    /// # Errors
    ///
    /// Requires operator role; fails when dependencies are unsatisfied or
    /// a run is already in flight.
    pub fn run_job(&self, bearer: &str, job_id: &str) -> ApiResult<JobRun> {
        let caller = self.caller(bearer, Role::Operator)?;
        Ok(self.scheduler.run_now(&caller.username, &JobId::new(job_id))?)
    }

    /// `GET /scheduler/history?job_id=&limit=`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn history(
        &self,
        bearer: &str,
        job_id: Option<&str>,
        limit: usize,
    ) -> ApiResult<Vec<JobRun>> {
        self.caller(bearer, Role::Viewer)?;
        let job_id = job_id.map(JobId::new);
        Ok(self.scheduler.history(job_id.as_ref(), limit)?)
    }

    /// `GET /scheduler/status`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn scheduler_status(&self, bearer: &str) -> ApiResult<SchedulerStatus> {
        self.caller(bearer, Role::Viewer)?;
        Ok(self.scheduler.status()?)
    }

    // -- devices ------------------------------------------------------------

    /// `GET /devices`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn devices(&self, bearer: &str) -> ApiResult<Vec<lnmt_tracker::Device>> {
        self.caller(bearer, Role::Viewer)?;
        Ok(self.tracker.list_devices(&DeviceFilter::default())?)
    }

    /// `GET /devices/{mac}/history`.
    ///
    /// # Errors
    ///
    /// Fails with `bad_request` for an unparseable MAC and `not_found`
    /// for an unknown device.
    pub fn device_history(&self, bearer: &str, mac: &str) -> ApiResult<DeviceHistoryResponse> {
        self.caller(bearer, Role::Viewer)?;
        let mac: MacAddr = mac.parse().map_err(|_| ApiError {
            code: crate::error::ApiErrorCode::BadRequest,
            detail_code: "invalid_mac".to_owned(),
            message: format!("not a MAC address: {mac}"),
        })?;
        let (samples, sessions) = self.tracker.history(&mac, 100)?;
        Ok(DeviceHistoryResponse { samples, sessions })
    }

    /// `GET /devices/alerts`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn device_alerts(&self, bearer: &str) -> ApiResult<Vec<ThresholdBreach>> {
        self.caller(bearer, Role::Viewer)?;
        Ok(self.tracker.alerts(100)?)
    }

    // -- health -------------------------------------------------------------

    /// `GET /health`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn health(&self, bearer: &str) -> ApiResult<HealthResponse> {
        self.caller(bearer, Role::Viewer)?;
        let probes = self.health.status()?;
        let healthy = probes.iter().all(|probe| {
            !probe.notified && probe.last_status != Some(HealthStatus::Fail)
        });
        Ok(HealthResponse { healthy, probes })
    }

    /// `GET /health/metrics`.
    ///
    /// # Errors
    ///
    /// Requires a valid viewer token.
    pub fn health_metrics(&self, bearer: &str) -> ApiResult<serde_json::Value> {
        self.caller(bearer, Role::Viewer)?;
        let probes = self.health.status()?;
        let scheduler = self.scheduler.status()?;
        Ok(serde_json::json!({
            "probes": probes,
            "scheduler": {
                "running": scheduler.running,
                "in_flight": scheduler.in_flight,
                "pending_retries": scheduler.pending_retries,
            },
        }))
    }
}

impl std::fmt::Debug for ApiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
