//! Session errors.

use thiserror::Error;

use crate::domain::crypto::CipherError;

/// Coarse failure classes used at the authentication boundary.
///
/// Every credential class collapses into one opaque "unauthenticated"
/// response; only [`ErrorClass::Persistence`] and [`ErrorClass::Internal`]
/// surface as server errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Startup configuration is unusable (bad key size).
    Configuration,
    /// Header could not be parsed or no peer certificate was presented.
    CredentialMalformed,
    /// No live session matches the token.
    CredentialNotFound,
    /// Stored session failed decryption or did not match the token.
    CredentialCorrupted,
    /// Credential store unreachable or erroring.
    Persistence,
    /// Local failure unrelated to the presented credential.
    Internal,
}

impl ErrorClass {
    /// Whether this class describes a bad credential rather than a server fault.
    #[must_use]
    pub const fn is_credential_failure(self) -> bool {
        matches!(
            self,
            Self::CredentialMalformed | Self::CredentialNotFound | Self::CredentialCorrupted
        )
    }

    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::CredentialMalformed => "credential_malformed",
            Self::CredentialNotFound => "credential_not_found",
            Self::CredentialCorrupted => "credential_corrupted",
            Self::Persistence => "persistence",
            Self::Internal => "internal",
        }
    }
}

/// Errors returned by a credential store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Could not reach the backing database.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Query failed.
    #[error("store query error: {0}")]
    Query(String),

    /// A session with the same token hash already exists.
    #[error("duplicate session token hash")]
    DuplicateHash,

    /// Row was missing a column or had the wrong type.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Store call did not finish within its deadline.
    #[error("store call timed out after {millis}ms")]
    Timeout {
        /// Deadline that elapsed.
        millis: u64,
    },
}

/// Errors from session issuance, validation and revocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Random token bytes could not be generated.
    #[error("failed to generate session token: {0}")]
    TokenGeneration(CipherError),

    /// Token could not be sealed for storage.
    #[error("failed to encrypt session token: {0}")]
    Encryption(CipherError),

    /// Credential store rejected or failed the call.
    #[error("session persistence failed: {0}")]
    SessionPersistenceFailed(#[from] StoreError),

    /// No live session for this token. Never-issued, expired and revoked
    /// tokens all land here.
    #[error("session not found")]
    SessionNotFound,

    /// Stored ciphertext failed to open.
    #[error("session corrupted: {0}")]
    SessionCorrupted(CipherError),

    /// Stored token decrypted but differs from the presented one.
    #[error("session token mismatch")]
    SessionTokenMismatch,
}

impl SessionError {
    /// Boundary class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::SessionNotFound => ErrorClass::CredentialNotFound,
            Self::SessionCorrupted(_) | Self::SessionTokenMismatch => {
                ErrorClass::CredentialCorrupted
            }
            Self::SessionPersistenceFailed(_) => ErrorClass::Persistence,
            Self::Encryption(CipherError::InvalidKeySize { .. }) => ErrorClass::Configuration,
            Self::TokenGeneration(_) | Self::Encryption(_) => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failures_are_credential_classes() {
        for err in [
            SessionError::SessionNotFound,
            SessionError::SessionCorrupted(CipherError::DecryptionFailed),
            SessionError::SessionCorrupted(CipherError::Malformed { len: 3 }),
            SessionError::SessionTokenMismatch,
        ] {
            assert!(err.class().is_credential_failure(), "{err}");
        }
    }

    #[test]
    fn test_persistence_is_not_a_credential_class() {
        let err = SessionError::from(StoreError::Timeout { millis: 5000 });
        assert_eq!(err.class(), ErrorClass::Persistence);
        assert!(!err.class().is_credential_failure());
    }

    #[test]
    fn test_bad_key_is_configuration() {
        let err = SessionError::Encryption(CipherError::InvalidKeySize { actual: 16 });
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_randomness_is_internal() {
        let err = SessionError::TokenGeneration(CipherError::RandomnessFailure);
        assert_eq!(err.class(), ErrorClass::Internal);
        assert_eq!(err.class().as_str(), "internal");
    }
}
