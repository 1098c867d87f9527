//! The authentication engine: credential checks, session lifecycle,
//! lockout, and audit.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use lnmt_core::UserId;
use lnmt_events::{EventBus, LnmtEvent};
use lnmt_store::{AuditEvent, AuditLog};
use tracing::{info, warn};

use crate::error::{AuthError, AuthResult};
use crate::storage::AuthStorage;
use crate::types::{Role, Session, SessionToken, User, ValidatedSession};

/// Lockout and session lifetime policy.
///
/// The daemon maps these from the `[auth]` config section.
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    /// Idle session lifetime in seconds.
    pub session_idle_s: u32,
    /// Remember-me session lifetime in seconds.
    pub session_remember_s: u32,
    /// Consecutive failures before lockout.
    pub lockout_threshold: u32,
    /// Window in which failures are counted, in seconds.
    pub lockout_window_s: u32,
    /// Lockout duration in seconds.
    pub lockout_duration_s: u32,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            session_idle_s: 1800,
            session_remember_s: 86_400,
            lockout_threshold: 5,
            lockout_window_s: 900,
            lockout_duration_s: 900,
        }
    }
}

/// The authentication and session engine.
pub struct AuthEngine {
    storage: AuthStorage,
    audit: AuditLog,
    events: EventBus,
    policy: AuthPolicy,
}

impl AuthEngine {
    /// Create an engine over the given storage and audit log.
    #[must_use]
    pub fn new(storage: AuthStorage, audit: AuditLog, events: EventBus, policy: AuthPolicy) -> Self {
        Self {
            storage,
            audit,
            events,
            policy,
        }
    }

    // -- credential store ---------------------------------------------------

    /// Create a new account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DuplicateUsername`] if the (case-insensitive)
    /// username is taken, or a store/hash error.
    pub fn create_user(
        &self,
        actor: &str,
        username: &str,
        password: &str,
        email: &str,
        role: Role,
    ) -> AuthResult<User> {
        if self.storage.get_user(username)?.is_some() {
            return Err(AuthError::DuplicateUsername {
                username: username.to_owned(),
            });
        }
        let user = User {
            id: UserId::new(),
            username: username.to_owned(),
            password_verifier: hash_password(password)?,
            email: email.to_owned(),
            role,
            enabled: true,
            failed_attempts: 0,
            last_failed_at: None,
            lockout_until: None,
            last_login: None,
            created_at: Utc::now(),
        };
        self.storage.put_user(&user)?;
        self.record(actor, "user_create", username, true, format!("role={role}"));
        Ok(user)
    }

    /// Replace an account's password verifier.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownUser`] or a store/hash error.
    pub fn set_password(&self, actor: &str, username: &str, password: &str) -> AuthResult<()> {
        let mut user = self.require_user(username)?;
        user.password_verifier = hash_password(password)?;
        user.failed_attempts = 0;
        user.lockout_until = None;
        self.storage.put_user(&user)?;
        self.record(actor, "user_passwd", username, true, "");
        Ok(())
    }

    /// Enable or disable an account. Disabling does not revoke live
    /// sessions; it blocks new logins.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownUser`] or a store error.
    pub fn set_enabled(&self, actor: &str, username: &str, enabled: bool) -> AuthResult<()> {
        let mut user = self.require_user(username)?;
        user.enabled = enabled;
        self.storage.put_user(&user)?;
        let action = if enabled { "user_enable" } else { "user_disable" };
        self.record(actor, action, username, true, "");
        Ok(())
    }

    /// List all accounts, verifiers redacted out by the caller as needed.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn list_users(&self) -> AuthResult<Vec<User>> {
        Ok(self.storage.list_users()?)
    }

    // -- session lifecycle --------------------------------------------------

    /// Verify credentials and issue a session token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`], [`AuthError::LockedOut`],
    /// [`AuthError::Disabled`], or a store/hash error.
    pub fn login(&self, username: &str, password: &str, remember_me: bool) -> AuthResult<Session> {
        self.login_at(username, password, remember_me, Utc::now())
    }

    fn login_at(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> AuthResult<Session> {
        let Some(mut user) = self.storage.get_user(username)? else {
            self.record(username, "login", username, false, "unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        if let Some(until) = user.lockout_until {
            if now < until {
                // Attempts during lockout do not extend it and do not
                // count as failures.
                self.record(username, "login", username, false, "locked out");
                return Err(AuthError::LockedOut { until });
            }
            user.lockout_until = None;
            user.failed_attempts = 0;
        }

        if !user.enabled {
            self.record(username, "login", username, false, "account disabled");
            return Err(AuthError::Disabled);
        }

        if verify_password(password, &user.password_verifier)? {
            user.failed_attempts = 0;
            user.last_failed_at = None;
            user.last_login = Some(now);
            self.storage.put_user(&user)?;

            let session = self.issue_session(&user, remember_me, now);
            self.storage.put_session(&session)?;
            self.record(username, "login", username, true, "");
            info!(username, "login succeeded");
            return Ok(session);
        }

        // Failure window: a gap longer than the window restarts the count.
        let window = Duration::seconds(i64::from(self.policy.lockout_window_s));
        if let Some(last) = user.last_failed_at {
            if now - last > window {
                user.failed_attempts = 0;
            }
        }
        user.failed_attempts += 1;
        user.last_failed_at = Some(now);

        if user.failed_attempts >= self.policy.lockout_threshold {
            let until = now + Duration::seconds(i64::from(self.policy.lockout_duration_s));
            user.lockout_until = Some(until);
            warn!(username, %until, "account locked out");
            self.record(
                username,
                "lockout",
                username,
                true,
                format!("after {} failures", user.failed_attempts),
            );
            self.events.publish(LnmtEvent::UserLockedOut {
                username: username.to_owned(),
                until,
            });
        }
        self.storage.put_user(&user)?;
        self.record(username, "login", username, false, "bad password");
        Err(AuthError::InvalidCredentials)
    }

    /// Revoke a session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownToken`] or a store error.
    pub fn logout(&self, token: &SessionToken) -> AuthResult<()> {
        let Some(mut session) = self.storage.get_session(token)? else {
            return Err(AuthError::UnknownToken);
        };
        session.revoked = true;
        self.storage.put_session(&session)?;
        self.record(&session.username.clone(), "logout", &session.username, true, "");
        Ok(())
    }

    /// Rotate a token: issue a new session, revoke the old one.
    ///
    /// Refresh is single-use; a second refresh of the same token fails
    /// with [`AuthError::Revoked`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownToken`], [`AuthError::Revoked`],
    /// [`AuthError::Expired`], or a store error.
    pub fn refresh(&self, token: &SessionToken) -> AuthResult<Session> {
        self.refresh_at(token, Utc::now())
    }

    fn refresh_at(&self, token: &SessionToken, now: DateTime<Utc>) -> AuthResult<Session> {
        let Some(mut old) = self.storage.get_session(token)? else {
            return Err(AuthError::UnknownToken);
        };
        if old.revoked {
            return Err(AuthError::Revoked);
        }
        if now > old.refresh_allowed_until {
            self.record(&old.username.clone(), "refresh", &old.username, false, "past refresh window");
            return Err(AuthError::Expired);
        }

        old.revoked = true;
        self.storage.put_session(&old)?;

        let Some(user) = self.storage.get_user(&old.username)? else {
            return Err(AuthError::UnknownUser {
                username: old.username.clone(),
            });
        };
        let fresh = self.issue_session(&user, old.remember_me, now);
        self.storage.put_session(&fresh)?;
        self.record(&old.username, "refresh", &old.username, true, "");
        Ok(fresh)
    }

    /// Resolve a token to the user behind it, sliding the idle expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownToken`], [`AuthError::Revoked`], or
    /// [`AuthError::Expired`].
    pub fn validate(&self, token: &SessionToken) -> AuthResult<ValidatedSession> {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &SessionToken, now: DateTime<Utc>) -> AuthResult<ValidatedSession> {
        let Some(mut session) = self.storage.get_session(token)? else {
            return Err(AuthError::UnknownToken);
        };
        if session.revoked {
            return Err(AuthError::Revoked);
        }
        if now > session.expires_at {
            return Err(AuthError::Expired);
        }
        session.expires_at = now + self.lifetime(session.remember_me);
        self.storage.put_session(&session)?;
        Ok(ValidatedSession {
            user_id: session.user_id,
            username: session.username,
            role: session.role,
            expires_at: session.expires_at,
        })
    }

    /// Enforce that `session` carries at least `required`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] when the role is insufficient.
    pub fn verify_role(&self, session: &ValidatedSession, required: Role) -> AuthResult<()> {
        if session.role.satisfies(required) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                required: required.to_string(),
            })
        }
    }

    /// Drop sessions past both expiry and refresh windows. Revoked rows
    /// are kept for `validate` to answer `Revoked` until they expire too.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns a store error on retrieval failure.
    pub fn prune_sessions(&self, now: DateTime<Utc>) -> AuthResult<usize> {
        let mut pruned = 0;
        for session in self.storage.list_sessions()? {
            if now > session.expires_at && now > session.refresh_allowed_until {
                self.storage.delete_session(&session.token)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // -- internals ----------------------------------------------------------

    fn require_user(&self, username: &str) -> AuthResult<User> {
        self.storage
            .get_user(username)?
            .ok_or_else(|| AuthError::UnknownUser {
                username: username.to_owned(),
            })
    }

    fn lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            Duration::seconds(i64::from(self.policy.session_remember_s))
        } else {
            Duration::seconds(i64::from(self.policy.session_idle_s))
        }
    }

    fn issue_session(&self, user: &User, remember_me: bool, now: DateTime<Utc>) -> Session {
        let lifetime = self.lifetime(remember_me);
        Session {
            token: SessionToken::generate(),
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            issued_at: now,
            expires_at: now + lifetime,
            refresh_allowed_until: now + lifetime,
            remember_me,
            revoked: false,
        }
    }

    fn record(&self, actor: &str, action: &str, target: &str, success: bool, details: impl Into<String>) {
        let event = AuditEvent::now(actor, action, target, success, details);
        if let Err(err) = self.audit.record(&event) {
            warn!(action, error = %err, "audit write failed");
        }
    }
}

impl std::fmt::Debug for AuthEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, verifier: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(verifier).map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lnmt_store::MemoryKvStore;

    fn engine() -> AuthEngine {
        let store: Arc<dyn lnmt_store::KvStore> = Arc::new(MemoryKvStore::new());
        AuthEngine::new(
            AuthStorage::new(Arc::clone(&store)),
            AuditLog::new(store),
            EventBus::new(),
            AuthPolicy::default(),
        )
    }

    fn engine_with_policy(policy: AuthPolicy) -> AuthEngine {
        let store: Arc<dyn lnmt_store::KvStore> = Arc::new(MemoryKvStore::new());
        AuthEngine::new(
            AuthStorage::new(Arc::clone(&store)),
            AuditLog::new(store),
            EventBus::new(),
            policy,
        )
    }

    #[test]
    fn test_login_roundtrip() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "a@example.net", Role::Admin)
            .unwrap();

        let session = engine.login("alice", "hunter2!", false).unwrap();
        let validated = engine.validate(&session.token).unwrap();
        assert_eq!(validated.username, "alice");
        assert_eq!(validated.role, Role::Admin);
    }

    #[test]
    fn test_wrong_password_and_unknown_user_look_alike() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();

        let wrong = engine.login("alice", "nope", false).unwrap_err();
        let unknown = engine.login("mallory", "nope", false).unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_lockout_after_threshold_and_recovery() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();

        let t0 = Utc::now();
        for i in 0..5 {
            let at = t0 + Duration::seconds(i * 10);
            let err = engine.login_at("alice", "wrong", false, at).unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        // Sixth attempt, even with the correct password, is locked out.
        let at = t0 + Duration::seconds(60);
        let err = engine.login_at("alice", "hunter2!", false, at).unwrap_err();
        assert!(matches!(err, AuthError::LockedOut { .. }));

        // failed_attempts does not grow during lockout.
        let user = engine.storage.get_user("alice").unwrap().unwrap();
        assert_eq!(user.failed_attempts, 5);

        // After the lockout duration the correct password succeeds and
        // the counter resets.
        let later = t0 + Duration::seconds(60 + 901);
        engine.login_at("alice", "hunter2!", false, later).unwrap();
        let user = engine.storage.get_user("alice").unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
        assert!(user.lockout_until.is_none());
    }

    #[test]
    fn test_failure_window_restarts_count() {
        let policy = AuthPolicy {
            lockout_window_s: 60,
            ..AuthPolicy::default()
        };
        let engine = engine_with_policy(policy);
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();

        let t0 = Utc::now();
        for i in 0..4 {
            engine
                .login_at("alice", "wrong", false, t0 + Duration::seconds(i))
                .unwrap_err();
        }
        // Fifth failure lands outside the window: the count restarts
        // instead of tripping the lockout.
        engine
            .login_at("alice", "wrong", false, t0 + Duration::seconds(200))
            .unwrap_err();
        let user = engine.storage.get_user("alice").unwrap().unwrap();
        assert_eq!(user.failed_attempts, 1);
        assert!(user.lockout_until.is_none());
    }

    #[test]
    fn test_refresh_rotates_and_is_single_use() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Operator)
            .unwrap();
        let session = engine.login("alice", "hunter2!", true).unwrap();

        let fresh = engine.refresh(&session.token).unwrap();
        assert_ne!(fresh.token, session.token);
        assert!(fresh.remember_me);

        // Old token is revoked synchronously.
        assert!(matches!(
            engine.validate(&session.token).unwrap_err(),
            AuthError::Revoked
        ));
        // Second refresh of the old token fails the same way.
        assert!(matches!(
            engine.refresh(&session.token).unwrap_err(),
            AuthError::Revoked
        ));
        // The fresh token works.
        engine.validate(&fresh.token).unwrap();
    }

    #[test]
    fn test_validate_expiry_and_unknown() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();
        let session = engine.login("alice", "hunter2!", false).unwrap();

        let past_expiry = Utc::now() + Duration::seconds(1801);
        assert!(matches!(
            engine.validate_at(&session.token, past_expiry).unwrap_err(),
            AuthError::Expired
        ));

        assert!(matches!(
            engine.validate(&SessionToken::generate()).unwrap_err(),
            AuthError::UnknownToken
        ));
    }

    #[test]
    fn test_validate_slides_idle_expiry() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();
        let session = engine.login("alice", "hunter2!", false).unwrap();

        let t1 = Utc::now() + Duration::seconds(1000);
        let validated = engine.validate_at(&session.token, t1).unwrap();
        assert!(validated.expires_at > session.expires_at);
    }

    #[test]
    fn test_disabled_account_cannot_login() {
        let engine = engine();
        engine
            .create_user("system", "alice", "hunter2!", "", Role::Viewer)
            .unwrap();
        engine.set_enabled("admin", "alice", false).unwrap();
        assert!(matches!(
            engine.login("alice", "hunter2!", false).unwrap_err(),
            AuthError::Disabled
        ));
    }

    #[test]
    fn test_role_gate() {
        let engine = engine();
        engine
            .create_user("system", "viewer", "hunter2!", "", Role::Viewer)
            .unwrap();
        let session = engine.login("viewer", "hunter2!", false).unwrap();
        let validated = engine.validate(&session.token).unwrap();

        engine.verify_role(&validated, Role::Viewer).unwrap();
        assert!(matches!(
            engine.verify_role(&validated, Role::Admin).unwrap_err(),
            AuthError::Forbidden { .. }
        ));
    }

    #[test]
    fn test_duplicate_username_rejected_case_insensitively() {
        let engine = engine();
        engine
            .create_user("system", "Alice", "hunter2!", "", Role::Viewer)
            .unwrap();
        assert!(matches!(
            engine
                .create_user("system", "alice", "x", "", Role::Viewer)
                .unwrap_err(),
            AuthError::DuplicateUsername { .. }
        ));
    }

    #[test]
    fn test_audit_rows_never_contain_password_or_token() {
        let engine = engine();
        engine
            .create_user("system", "alice", "sup3rs3cret", "", Role::Viewer)
            .unwrap();
        let session = engine.login("alice", "sup3rs3cret", false).unwrap();
        engine.logout(&session.token).unwrap();

        let rows = engine.audit.query(&lnmt_store::AuditQuery::default()).unwrap();
        assert!(!rows.is_empty());
        for row in rows {
            assert!(!row.details.contains("sup3rs3cret"));
            assert!(!row.details.contains(session.token.as_str()));
        }
    }
}
