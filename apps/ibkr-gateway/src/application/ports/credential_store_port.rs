//! Credential Store Port (Driven Port)
//!
//! Persistence contract for session records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::crypto::TokenHash;
use crate::domain::session::{NewSession, Session, StoreError};

/// Port for session persistence.
///
/// Implementations must filter expired rows in [`get_by_hash`] itself, so a
/// caller never sees a session past its `expires_at`.
///
/// [`get_by_hash`]: CredentialStorePort::get_by_hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStorePort: Send + Sync {
    /// Insert a session. Fails with [`StoreError::DuplicateHash`] if the hash
    /// is already taken.
    async fn create(&self, session: NewSession) -> Result<Session, StoreError>;

    /// Find a live session by token hash.
    async fn get_by_hash(&self, hash: &TokenHash) -> Result<Option<Session>, StoreError>;

    /// Delete the session with this hash. Absent rows are not an error.
    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<(), StoreError>;

    /// Delete every expired session, returning how many were removed.
    async fn delete_expired(&self) -> Result<u64, StoreError>;

    /// Check the backing store can serve requests.
    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory implementation for testing and local runs.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    sessions: std::sync::RwLock<HashMap<TokenHash, Session>>,
    next_id: AtomicI64,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing expiry checks.
    ///
    /// Lets tests seed sessions that are already expired.
    pub fn insert_raw(&self, session: NewSession) -> Session {
        let record = self.to_record(session);
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(record.token_hash.clone(), record.clone());
        record
    }

    /// Number of stored rows, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored row regardless of expiry, for inspection in tests.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Overwrite the sealed token of a stored row.
    ///
    /// Returns `false` if no row has this hash.
    #[cfg(test)]
    pub(crate) fn corrupt(&self, hash: &TokenHash, encrypted_token: Vec<u8>) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match sessions.get_mut(hash) {
            Some(session) => {
                session.encrypted_token = encrypted_token;
                true
            }
            None => false,
        }
    }

    fn to_record(&self, session: NewSession) -> Session {
        Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            identity: session.identity,
            encrypted_token: session.encrypted_token,
            token_hash: session.token_hash,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl CredentialStorePort for InMemoryCredentialStore {
    async fn create(&self, session: NewSession) -> Result<Session, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if sessions.contains_key(&session.token_hash) {
            return Err(StoreError::DuplicateHash);
        }
        let record = self.to_record(session);
        sessions.insert(record.token_hash.clone(), record.clone());
        drop(sessions);
        Ok(record)
    }

    async fn get_by_hash(&self, hash: &TokenHash) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(sessions
            .get(hash)
            .filter(|s| !s.is_expired_at(now))
            .cloned())
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<(), StoreError> {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(hash);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        let removed = before - sessions.len();
        drop(sessions);
        Ok(removed as u64)
    }
}
