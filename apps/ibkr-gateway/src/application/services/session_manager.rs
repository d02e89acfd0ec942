//! Session Manager
//!
//! Issues, validates and revokes bearer sessions.
//!
//! # Flow
//!
//! ```text
//! create(identity)                      validate(token)
//!   32 random bytes → base64url           hash(token)
//!   seal(token, key)                      store.get_by_hash   (expired rows filtered)
//!   hash(token)                           open(ciphertext, key)
//!   store.create                          constant-time compare with token
//!   → token                               → identity
//! ```
//!
//! There is no cache: every validation reads the store, so a deletion takes
//! effect for the very next request. Store calls are never retried. Each one
//! runs under `store_timeout`, and dropping the returned future cancels it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use rand::TryRngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::application::ports::CredentialStorePort;
use crate::domain::crypto::{CipherError, EncryptionKey, hash_token};
use crate::domain::session::{
    NewSession, SESSION_TOKEN_BYTES, SessionError, SessionToken, StoreError,
};

/// Session lifetime when none is configured.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Deadline for a single store call when none is configured.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Session manager settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Session lifetime. Zero selects [`DEFAULT_SESSION_TTL`].
    pub ttl: Duration,
    /// Deadline for each store call. Zero selects [`DEFAULT_STORE_TIMEOUT`].
    pub store_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Issues and validates sessions against a credential store.
pub struct SessionManager<S: CredentialStorePort + ?Sized> {
    store: Arc<S>,
    key: EncryptionKey,
    ttl: Duration,
    store_timeout: Duration,
}

impl<S: CredentialStorePort + ?Sized> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: CredentialStorePort + ?Sized> SessionManager<S> {
    /// Create a manager with default settings.
    pub fn new(store: Arc<S>, key: EncryptionKey) -> Self {
        Self::with_settings(store, key, SessionSettings::default())
    }

    /// Create a manager with explicit settings.
    pub fn with_settings(store: Arc<S>, key: EncryptionKey, settings: SessionSettings) -> Self {
        let ttl = if settings.ttl.is_zero() {
            DEFAULT_SESSION_TTL
        } else {
            settings.ttl
        };
        let store_timeout = if settings.store_timeout.is_zero() {
            DEFAULT_STORE_TIMEOUT
        } else {
            settings.store_timeout
        };
        Self {
            store,
            key,
            ttl,
            store_timeout,
        }
    }

    /// Effective session lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Effective per-call store deadline.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Issue a session for `identity` and return its plaintext token.
    ///
    /// The returned token is the only copy of the plaintext; only its sealed
    /// form and digest are stored.
    ///
    /// # Errors
    ///
    /// - [`SessionError::TokenGeneration`] if no random bytes are available.
    /// - [`SessionError::Encryption`] if the token could not be sealed.
    /// - [`SessionError::SessionPersistenceFailed`] if the store fails.
    #[tracing::instrument(skip(self), fields(ttl_secs = self.ttl.as_secs()))]
    pub async fn create(&self, identity: &str) -> Result<SessionToken, SessionError> {
        let token = generate_token()?;

        let encrypted_token = self
            .key
            .encrypt(token.expose().as_bytes())
            .map_err(SessionError::Encryption)?;
        let token_hash = hash_token(token.expose());

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        let session = self
            .with_deadline(self.store.create(NewSession {
                identity: identity.to_string(),
                encrypted_token,
                token_hash,
                expires_at,
            }))
            .await?;

        tracing::info!(
            session_id = session.id,
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(token)
    }

    /// Resolve `token` to the identity it was issued for.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`] for unknown, expired or revoked
    ///   tokens.
    /// - [`SessionError::SessionCorrupted`] if the stored ciphertext does not
    ///   open under the process key.
    /// - [`SessionError::SessionTokenMismatch`] if it opens to a different
    ///   token.
    /// - [`SessionError::SessionPersistenceFailed`] if the store fails.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<String, SessionError> {
        let token_hash = hash_token(token);

        let session = self
            .with_deadline(self.store.get_by_hash(&token_hash))
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        let decrypted = Zeroizing::new(
            self.key
                .decrypt(&session.encrypted_token)
                .map_err(SessionError::SessionCorrupted)?,
        );

        if !bool::from(decrypted.as_slice().ct_eq(token.as_bytes())) {
            return Err(SessionError::SessionTokenMismatch);
        }

        Ok(session.identity)
    }

    /// Revoke the session for `token`. Unknown tokens are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionPersistenceFailed`] if the store fails.
    #[tracing::instrument(skip_all)]
    pub async fn delete(&self, token: &str) -> Result<(), SessionError> {
        let token_hash = hash_token(token);
        self.with_deadline(self.store.delete_by_hash(&token_hash))
            .await?;
        tracing::debug!("Session deleted");
        Ok(())
    }

    /// Remove every expired session, returning how many were removed.
    ///
    /// Runs once per call; periodic invocation belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionPersistenceFailed`] if the store fails.
    #[tracing::instrument(skip_all)]
    pub async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        let removed = self.with_deadline(self.store.delete_expired()).await?;
        tracing::debug!(removed, "Expired sessions removed");
        Ok(removed)
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::SessionPersistenceFailed(StoreError::Timeout {
                millis: u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX),
            })),
        }
    }
}

/// Draw a fresh token: 32 random bytes, URL-safe base64 with padding.
fn generate_token() -> Result<SessionToken, SessionError> {
    let mut bytes = Zeroizing::new([0u8; SESSION_TOKEN_BYTES]);
    OsRng
        .try_fill_bytes(&mut *bytes)
        .map_err(|_| SessionError::TokenGeneration(CipherError::RandomnessFailure))?;
    Ok(SessionToken::new(URL_SAFE.encode(&*bytes)))
}

// =============================================================================
// Tests
// =============================================================================
