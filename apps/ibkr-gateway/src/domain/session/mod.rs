//! Session Types
//!
//! A session binds an opaque bearer token to the principal it was issued
//! for. Only the sealed token and its digest are stored; the plaintext exists
//! once, in the [`SessionToken`] handed back to the caller at issuance.
//!
//! Stored records are immutable. They are created, read and deleted, never
//! updated.

mod errors;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::domain::crypto::TokenHash;

pub use errors::{ErrorClass, SessionError, StoreError};

/// Number of random bytes in a session token before encoding.
pub const SESSION_TOKEN_BYTES: usize = 32;

// =============================================================================
// Session Token
// =============================================================================

/// Plaintext bearer token returned from session issuance.
///
/// The string is wiped on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Zeroizing<String>);

impl SessionToken {
    /// Wrap an encoded token.
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(Zeroizing::new(token))
    }

    /// The encoded token, for transmission to the client.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

// =============================================================================
// Session Records
// =============================================================================

/// A session about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Principal the session authenticates as.
    pub identity: String,
    /// `nonce ‖ ciphertext ‖ tag` of the plaintext token.
    pub encrypted_token: Vec<u8>,
    /// Digest of the plaintext token.
    pub token_hash: TokenHash,
    /// Instant after which the session no longer validates.
    pub expires_at: DateTime<Utc>,
}

/// A persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Store-assigned row id.
    pub id: i64,
    /// Principal the session authenticates as.
    pub identity: String,
    /// `nonce ‖ ciphertext ‖ tag` of the plaintext token.
    pub encrypted_token: Vec<u8>,
    /// Digest of the plaintext token; unique across live sessions.
    pub token_hash: TokenHash,
    /// Instant after which the session no longer validates.
    pub expires_at: DateTime<Utc>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
