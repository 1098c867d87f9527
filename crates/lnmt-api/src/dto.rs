//! Wire DTOs.

use std::collections::BTreeSet;

use chrono::Utc;
use lnmt_auth::Role;
use lnmt_core::JobId;
use lnmt_sched::{CronExpr, Job, Priority};
use lnmt_tracker::{PresenceSample, UsageSession};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Uniform response envelope: `{data, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Payload, absent on error.
    pub data: Option<T>,
    /// Error, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> Envelope<T> {
    /// Success envelope.
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Error envelope.
    #[must_use]
    pub fn err(error: ApiError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

impl<T> From<crate::error::ApiResult<T>> for Envelope<T> {
    fn from(result: crate::error::ApiResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::err(error),
        }
    }
}

/// `POST /auth/login` body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Username.
    pub username: String,
    /// Password, never logged.
    pub password: String,
    /// Long-lived session.
    #[serde(default)]
    pub remember_me: bool,
}

/// Caller-visible account info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    /// Username.
    pub username: String,
    /// Role.
    pub role: Role,
}

/// `POST /auth/login` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token.
    pub token: String,
    /// Seconds until expiry.
    pub expires_in: i64,
    /// The account behind the session.
    pub user: UserDto,
}

/// `POST /scheduler/jobs` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Stable job id.
    pub id: String,
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
    /// Dependency job ids.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Whether the job is scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments.
    #[serde(default)]
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

impl From<CreateJobRequest> for Job {
    fn from(request: CreateJobRequest) -> Self {
        let now = Utc::now();
        Job {
            id: JobId::new(request.id),
            name: request.name,
            target: request.target,
            schedule: request.schedule,
            priority: request.priority,
            max_retries: request.max_retries,
            retry_delay_s: request.retry_delay_s,
            timeout_s: request.timeout_s,
            dependencies: request.dependencies.into_iter().map(JobId).collect(),
            enabled: request.enabled,
            args: request.args,
            kwargs: request.kwargs,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `GET /devices/{mac}/history` response.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHistoryResponse {
    /// Presence samples, newest first.
    pub samples: Vec<PresenceSample>,
    /// Closed usage sessions, newest first.
    pub sessions: Vec<UsageSession>,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall verdict: `ok` unless any probe is failing or escalated.
    pub healthy: bool,
    /// Per-probe summaries.
    pub probes: Vec<lnmt_health::ProbeStatusSummary>,
}
