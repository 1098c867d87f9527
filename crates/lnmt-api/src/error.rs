//! Wire error mapping.
//!
//! Subsystem errors carry a stable code and a taxonomy class; this
//! module folds them onto the fixed HTTP error vocabulary. Messages are
//! already sanitized by the subsystems; nothing secret reaches a wire
//! error.

use lnmt_core::{ErrorClass, StableCoded};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed wire error vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    /// 400.
    BadRequest,
    /// 401.
    Unauthenticated,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// 409.
    Conflict,
    /// 429.
    RateLimited,
    /// 500.
    Internal,
}

impl ApiErrorCode {
    /// The HTTP status this code maps to.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimited => 429,
            Self::Internal => 500,
        }
    }
}

/// A wire-level error.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    /// Generic wire code.
    pub code: ApiErrorCode,
    /// Stable subsystem code, e.g. `"cycle_detected"`.
    pub detail_code: String,
    /// Human-readable, sanitized message.
    pub message: String,
}

impl ApiError {
    /// Build from any subsystem error carrying a stable code.
    pub fn from_coded<E: StableCoded + std::fmt::Display>(err: &E) -> Self {
        let detail_code = err.code();
        let code = match (err.class(), detail_code) {
            // Session problems are authentication problems.
            (_, "session_expired" | "session_revoked" | "unknown_token" | "invalid_credentials") => {
                ApiErrorCode::Unauthenticated
            }
            (_, "forbidden") => ApiErrorCode::Forbidden,
            (_, "locked_out") => ApiErrorCode::RateLimited,
            // Duplicates name an existing resource.
            (_, code) if code.starts_with("duplicate_") => ApiErrorCode::Conflict,
            (ErrorClass::Input, code) if code.starts_with("unknown_") => ApiErrorCode::NotFound,
            (ErrorClass::Input, _) => ApiErrorCode::BadRequest,
            (ErrorClass::Policy, _) => ApiErrorCode::Conflict,
            (ErrorClass::Transient | ErrorClass::Bug | ErrorClass::Partial, _) => {
                ApiErrorCode::Internal
            }
        };
        Self {
            code,
            detail_code: detail_code.to_owned(),
            message: err.to_string(),
        }
    }

    /// An unauthenticated error for missing/invalid bearer tokens.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            code: ApiErrorCode::Unauthenticated,
            detail_code: "unauthenticated".to_owned(),
            message: "missing or invalid bearer token".to_owned(),
        }
    }
}

macro_rules! impl_from_coded {
    ($($ty:ty),+) => {
        $(impl From<$ty> for ApiError {
            fn from(err: $ty) -> Self {
                Self::from_coded(&err)
            }
        })+
    };
}

impl_from_coded!(
    lnmt_auth::AuthError,
    lnmt_sched::SchedError,
    lnmt_tracker::TrackerError,
    lnmt_health::HealthError,
    lnmt_store::StoreError
);

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lnmt_core::JobId;

    #[test]
    fn test_http_status_table() {
        assert_eq!(ApiErrorCode::BadRequest.http_status(), 400);
        assert_eq!(ApiErrorCode::Unauthenticated.http_status(), 401);
        assert_eq!(ApiErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ApiErrorCode::NotFound.http_status(), 404);
        assert_eq!(ApiErrorCode::Conflict.http_status(), 409);
        assert_eq!(ApiErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ApiErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn test_subsystem_error_mapping() {
        let unknown = lnmt_sched::SchedError::UnknownJob {
            job_id: JobId::new("x"),
        };
        assert_eq!(ApiError::from(unknown).code, ApiErrorCode::NotFound);

        let duplicate = lnmt_sched::SchedError::DuplicateId {
            job_id: JobId::new("x"),
        };
        let mapped = ApiError::from(duplicate);
        assert_eq!(mapped.code, ApiErrorCode::Conflict);
        assert_eq!(mapped.detail_code, "duplicate_id");

        let locked = lnmt_auth::AuthError::LockedOut {
            until: chrono::Utc::now(),
        };
        assert_eq!(ApiError::from(locked).code, ApiErrorCode::RateLimited);

        let expired = lnmt_auth::AuthError::Expired;
        assert_eq!(ApiError::from(expired).code, ApiErrorCode::Unauthenticated);
    }
}
