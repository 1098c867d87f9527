//! Auth error types.

use chrono::{DateTime, Utc};
use lnmt_core::{ErrorClass, StableCoded};
use lnmt_store::StoreError;
use thiserror::Error;

/// Errors raised by the authentication engine.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username unknown or password wrong. Deliberately one error: callers
    /// must not be able to distinguish the two.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account is locked out.
    #[error("account locked out until {until}")]
    LockedOut {
        /// When the lockout ends.
        until: DateTime<Utc>,
    },

    /// The account is disabled.
    #[error("account disabled")]
    Disabled,

    /// The session token expired.
    #[error("session expired")]
    Expired,

    /// The session token was revoked.
    #[error("session revoked")]
    Revoked,

    /// No session exists for the token.
    #[error("unknown session token")]
    UnknownToken,

    /// No such user.
    #[error("unknown user: {username}")]
    UnknownUser {
        /// The username that was not found.
        username: String,
    },

    /// A user with that username already exists.
    #[error("username already taken: {username}")]
    DuplicateUsername {
        /// The contested username.
        username: String,
    },

    /// The session's role is insufficient.
    #[error("requires role {required}")]
    Forbidden {
        /// The role the operation requires.
        required: String,
    },

    /// Password hashing or verification infrastructure failed.
    #[error("credential hashing failed: {0}")]
    Hash(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StableCoded for AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::LockedOut { .. } => "locked_out",
            Self::Disabled => "account_disabled",
            Self::Expired => "session_expired",
            Self::Revoked => "session_revoked",
            Self::UnknownToken => "unknown_token",
            Self::UnknownUser { .. } => "unknown_user",
            Self::DuplicateUsername { .. } => "duplicate_username",
            Self::Forbidden { .. } => "forbidden",
            Self::Hash(_) => "credential_hash",
            Self::Store(_) => "store_backend",
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCredentials | Self::UnknownUser { .. } | Self::DuplicateUsername { .. } => {
                ErrorClass::Input
            }
            Self::LockedOut { .. }
            | Self::Disabled
            | Self::Expired
            | Self::Revoked
            | Self::UnknownToken
            | Self::Forbidden { .. } => ErrorClass::Policy,
            Self::Hash(_) => ErrorClass::Bug,
            Self::Store(e) => e.class(),
        }
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
