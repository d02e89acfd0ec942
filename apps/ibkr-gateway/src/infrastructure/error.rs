//! gRPC status mapping for authentication failures.
//!
//! Remote callers only ever learn one of three things: the credential was
//! rejected, the session store is unavailable, or something else broke.
//! Which credential check failed stays in the server log.
//!
//! # gRPC Status Codes
//!
//! | Code | Name | Usage |
//! |------|------|-------|
//! | `UNAUTHENTICATED` (16) | Unauthenticated | Missing, malformed, unknown, expired, revoked or corrupted credential |
//! | `INTERNAL` (13) | Internal Error | Session store failure, local crypto or configuration failure |

use tonic::Code;
use tonic_types::{ErrorDetails, StatusExt};

use crate::domain::session::{ErrorClass, SessionError};

/// Domain for gateway error details.
pub const ERROR_DOMAIN: &str = "ibkr.gateway";

/// Fixed message for rejected credentials.
pub const UNAUTHENTICATED_MESSAGE: &str = "unauthenticated";

/// Fixed message for server-side failures.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Error codes exposed at the gateway boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Credential rejected, for any reason.
    Unauthenticated,
    /// Session store unreachable or erroring.
    SessionStoreUnavailable,
    /// Any other server fault.
    InternalError,
}

impl ErrorCode {
    /// Boundary code for an internal error class.
    #[must_use]
    pub const fn from_class(class: ErrorClass) -> Self {
        match class {
            ErrorClass::CredentialMalformed
            | ErrorClass::CredentialNotFound
            | ErrorClass::CredentialCorrupted => Self::Unauthenticated,
            ErrorClass::Persistence => Self::SessionStoreUnavailable,
            ErrorClass::Configuration | ErrorClass::Internal => Self::InternalError,
        }
    }

    /// gRPC status code.
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        match self {
            Self::Unauthenticated => Code::Unauthenticated,
            Self::SessionStoreUnavailable | Self::InternalError => Code::Internal,
        }
    }

    /// Error reason string (for gRPC ErrorInfo).
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::SessionStoreUnavailable => "SESSION_STORE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Convert to the status returned to the caller.
    ///
    /// Unauthenticated statuses carry no details. Server faults carry only an
    /// `ErrorInfo` with the reason.
    #[must_use]
    pub fn to_status(&self) -> tonic::Status {
        match self {
            Self::Unauthenticated => tonic::Status::new(self.grpc_code(), UNAUTHENTICATED_MESSAGE),
            Self::SessionStoreUnavailable | Self::InternalError => {
                let mut details = ErrorDetails::new();
                details.set_error_info(self.reason(), ERROR_DOMAIN, std::collections::HashMap::new());
                tonic::Status::with_error_details(self.grpc_code(), INTERNAL_MESSAGE, details)
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

impl From<&SessionError> for ErrorCode {
    fn from(err: &SessionError) -> Self {
        Self::from_class(err.class())
    }
}
