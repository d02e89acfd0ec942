//! Authentication Gate
//!
//! Per-request state machine:
//!
//! ```text
//! Unauthenticated ──extract──► CredentialExtracted ──validate──► Authenticated(identity)
//!        │                              │
//!        └──► ExtractionFailed          └──► ValidationFailed
//! ```
//!
//! The deployment picks one [`Authenticator`] at startup; the gate never
//! branches on mode per request. Failures are logged here with their real
//! cause and leave as an opaque [`GateRejection`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::session::{ErrorClass, SessionError};
use crate::infrastructure::error::ErrorCode;

// =============================================================================
// Auth Mode
// =============================================================================

/// How callers prove who they are. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMode {
    /// `Authorization: Bearer <session token>`.
    #[default]
    Bearer,
    /// Verified client certificate from the TLS handshake.
    Mtls,
}

impl AuthMode {
    /// Parse a mode name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bearer" => Some(Self::Bearer),
            "mtls" => Some(Self::Mtls),
            _ => None,
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Mtls => "mtls",
        }
    }
}

// =============================================================================
// Credentials and Identity
// =============================================================================

/// Transport-neutral view of what a request presented.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    /// Raw `authorization` header value, if present and valid UTF-8.
    pub authorization: Option<String>,
    /// DER bytes of the chain-verified leaf client certificate.
    pub peer_certificate: Option<Vec<u8>>,
}

impl RequestCredentials {
    /// Credentials carrying only an `authorization` header.
    #[must_use]
    pub fn bearer(header: impl Into<String>) -> Self {
        Self {
            authorization: Some(header.into()),
            peer_certificate: None,
        }
    }

    /// Credentials carrying only a peer certificate.
    #[must_use]
    pub const fn peer_certificate(der: Vec<u8>) -> Self {
        Self {
            authorization: None,
            peer_certificate: Some(der),
        }
    }
}

impl std::fmt::Debug for RequestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCredentials")
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "peer_certificate_len",
                &self.peer_certificate.as_ref().map(Vec::len),
            )
            .finish()
    }
}

/// Identity attached to a request after authentication.
///
/// Stored in request extensions. Its absence means the request was not
/// authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedIdentity {
    identity: String,
    mode: AuthMode,
}

impl AuthenticatedIdentity {
    /// Create an identity.
    #[must_use]
    pub fn new(identity: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            identity: identity.into(),
            mode,
        }
    }

    /// Principal name (account id or certificate subject).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.identity
    }

    /// How the identity was established.
    #[must_use]
    pub const fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Consume into the principal name.
    #[must_use]
    pub fn into_string(self) -> String {
        self.identity
    }
}

// =============================================================================
// Authenticator Strategy
// =============================================================================

/// Why an authenticator refused a request. Server-side only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No `authorization` header, or not of the form `Bearer <token>`.
    #[error("missing or malformed bearer credential")]
    MissingBearerToken,

    /// Transport supplied no verified client certificate.
    #[error("no verified client certificate")]
    MissingPeerCertificate,

    /// Credential resolved to an empty identity.
    #[error("credential carries no identity")]
    EmptyIdentity,

    /// Session validation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl AuthFailure {
    /// Boundary class for this failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::MissingBearerToken | Self::MissingPeerCertificate | Self::EmptyIdentity => {
                ErrorClass::CredentialMalformed
            }
            Self::Session(e) => e.class(),
        }
    }
}

/// Produces an identity from request credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Mode this authenticator implements.
    fn mode(&self) -> AuthMode;

    /// Resolve credentials to a principal name.
    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<String, AuthFailure>;
}

// =============================================================================
// Gate
// =============================================================================

/// Opaque rejection returned to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRejection {
    class: ErrorClass,
}

impl GateRejection {
    /// Internal class, for metrics and tests. Never sent to the caller.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.class
    }

    /// Boundary error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::from_class(self.class)
    }

    /// Status for the remote caller.
    #[must_use]
    pub fn to_status(&self) -> tonic::Status {
        self.code().to_status()
    }
}

/// Runs the configured authenticator and shapes its outcome.
#[derive(Clone)]
pub struct AuthenticationGate {
    authenticator: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for AuthenticationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationGate")
            .field("mode", &self.mode())
            .finish()
    }
}

impl AuthenticationGate {
    /// Create a gate around an authenticator.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.authenticator.mode()
    }

    /// Authenticate one request.
    ///
    /// # Errors
    ///
    /// Returns a [`GateRejection`] for any failure. Credential failures all
    /// map to the same `UNAUTHENTICATED` status.
    pub async fn authenticate(
        &self,
        credentials: &RequestCredentials,
    ) -> Result<AuthenticatedIdentity, GateRejection> {
        let mode = self.mode();
        let outcome = match self.authenticator.authenticate(credentials).await {
            Ok(identity) if identity.is_empty() => Err(AuthFailure::EmptyIdentity),
            other => other,
        };

        match outcome {
            Ok(identity) => {
                tracing::debug!(identity = %identity, mode = mode.as_str(), "Request authenticated");
                Ok(AuthenticatedIdentity::new(identity, mode))
            }
            Err(failure) => {
                let class = failure.class();
                if class.is_credential_failure() {
                    tracing::warn!(
                        mode = mode.as_str(),
                        class = class.as_str(),
                        reason = %failure,
                        "Authentication rejected"
                    );
                } else {
                    tracing::error!(
                        mode = mode.as_str(),
                        class = class.as_str(),
                        error = %failure,
                        "Authentication failed"
                    );
                }
                Err(GateRejection { class })
            }
        }
    }
}
