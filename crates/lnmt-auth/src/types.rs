//! User, role, and session types.

use std::fmt;

use chrono::{DateTime, Utc};
use lnmt_core::UserId;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Operator role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Day-to-day operations (run jobs, reset probes).
    Operator,
    /// Full control including user administration.
    Admin,
}

impl Role {
    /// Whether this role satisfies `required`.
    #[must_use]
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => f.write_str("viewer"),
            Self::Operator => f.write_str("operator"),
            Self::Admin => f.write_str("admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An operator account.
///
/// `password_verifier` is an opaque argon2id PHC string; the bare
/// password never touches the store or the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique account id.
    pub id: UserId,
    /// Unique username; matching is case-insensitive.
    pub username: String,
    /// Opaque password verifier (PHC string).
    pub password_verifier: String,
    /// Contact address.
    pub email: String,
    /// Privilege level.
    pub role: Role,
    /// Disabled accounts cannot log in.
    pub enabled: bool,
    /// Consecutive failed login attempts in the current window.
    pub failed_attempts: u32,
    /// Start of the failure-counting window.
    pub last_failed_at: Option<DateTime<Utc>>,
    /// Lockout expiry, when locked.
    pub lockout_until: Option<DateTime<Utc>>,
    /// Last successful login.
    pub last_login: Option<DateTime<Utc>>,
    /// Account creation time.
    pub created_at: DateTime<Utc>,
}

/// An opaque session token.
///
/// 32 random bytes, hex-encoded. Comparison is constant-time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    /// Generate a fresh high-entropy token.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// View the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SessionToken {}

// Tokens are secrets: Display shows a redacted form.
impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..6).unwrap_or("");
        write!(f, "{prefix}…")
    }
}

/// A live (or revoked) operator session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The bearer token.
    pub token: SessionToken,
    /// Account the session belongs to.
    pub user_id: UserId,
    /// Username snapshot for audit and display.
    pub username: String,
    /// Role snapshot at issue time.
    pub role: Role,
    /// When the session was issued.
    pub issued_at: DateTime<Utc>,
    /// Current expiry; slides forward on successful validation.
    pub expires_at: DateTime<Utc>,
    /// Refresh is allowed only up to this instant.
    pub refresh_allowed_until: DateTime<Utc>,
    /// Whether the token was issued with `remember_me`.
    pub remember_me: bool,
    /// Revoked tokens fail validation immediately.
    pub revoked: bool,
}

/// Result of validating a token: the user behind the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSession {
    /// Account id.
    pub user_id: UserId,
    /// Username.
    pub username: String,
    /// Effective role.
    pub role: Role,
    /// Current session expiry.
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin.satisfies(Role::Viewer));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Operator.satisfies(Role::Viewer));
        assert!(!Role::Viewer.satisfies(Role::Operator));
        assert!(!Role::Operator.satisfies(Role::Admin));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_token_entropy_and_shape() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_token_display_is_redacted() {
        let token = SessionToken::generate();
        let shown = token.to_string();
        assert!(shown.len() < token.as_str().len());
        assert!(!shown.contains(token.as_str()));
    }
}
