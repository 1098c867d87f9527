//! Typed auth storage over the key-value store.
//!
//! Users are keyed by normalized (lowercase) username; sessions by token.
//! Both namespaces live in the configuration tier.

use std::sync::Arc;

use lnmt_store::{KvStore, StoreError, StoreResult};

use crate::types::{Session, SessionToken, User};

const NS_USERS: &str = "auth:users";
const NS_SESSIONS: &str = "auth:sessions";

/// Auth rows in the store.
#[derive(Clone)]
pub struct AuthStorage {
    store: Arc<dyn KvStore>,
}

impl AuthStorage {
    /// Create storage over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Normalized store key for a username.
    #[must_use]
    pub fn normalize_username(username: &str) -> String {
        username.trim().to_lowercase()
    }

    /// Fetch a user by username (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn get_user(&self, username: &str) -> StoreResult<Option<User>> {
        let key = Self::normalize_username(username);
        match self.store.get(NS_USERS, &key)? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Insert or update a user row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if persistence fails.
    pub fn put_user(&self, user: &User) -> StoreResult<()> {
        let key = Self::normalize_username(&user.username);
        let raw =
            serde_json::to_vec(user).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(NS_USERS, &key, raw)
    }

    /// List every user, sorted by username.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut users = Vec::new();
        for key in self.store.list_keys(NS_USERS)? {
            if let Some(raw) = self.store.get(NS_USERS, &key)? {
                users.push(
                    serde_json::from_slice(&raw)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                );
            }
        }
        Ok(users)
    }

    /// Fetch a session by token.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn get_session(&self, token: &SessionToken) -> StoreResult<Option<Session>> {
        match self.store.get(NS_SESSIONS, token.as_str())? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Insert or update a session row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if persistence fails.
    pub fn put_session(&self, session: &Session) -> StoreResult<()> {
        let raw =
            serde_json::to_vec(session).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(NS_SESSIONS, session.token.as_str(), raw)
    }

    /// Delete a session row (used by expiry sweeps; revocation keeps the
    /// row so `validate` can answer `Revoked` rather than `Unknown`).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    pub fn delete_session(&self, token: &SessionToken) -> StoreResult<()> {
        self.store.delete(NS_SESSIONS, token.as_str())
    }

    /// List every session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if retrieval or deserialization fails.
    pub fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for key in self.store.list_keys(NS_SESSIONS)? {
            if let Some(raw) = self.store.get(NS_SESSIONS, &key)? {
                sessions.push(
                    serde_json::from_slice(&raw)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                );
            }
        }
        Ok(sessions)
    }
}

impl std::fmt::Debug for AuthStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStorage").finish_non_exhaustive()
    }
}
