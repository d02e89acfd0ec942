//! Request Authentication
//!
//! Two mutually exclusive modes, chosen once at startup:
//!
//! - **bearer**: `Authorization: Bearer <token>` validated against stored sessions
//! - **mtls**: identity taken from the client certificate the TLS layer verified
//!
//! Both implement [`Authenticator`]; [`AuthLayer`] runs whichever one the
//! deployment selected ahead of every gRPC service.

mod bearer;
mod gate;
mod layer;
mod mtls;
mod tls;

use std::sync::Arc;

pub use bearer::{BearerAuthenticator, extract_bearer_token};
pub use gate::{
    AuthFailure, AuthMode, AuthenticatedIdentity, AuthenticationGate, Authenticator,
    GateRejection, RequestCredentials,
};
pub use layer::{AuthLayer, AuthService, authenticated_identity};
pub use mtls::MtlsAuthenticator;
pub use tls::{MtlsConfig, TlsError};

use crate::application::ports::CredentialStorePort;
use crate::application::services::SessionManager;

/// Build the authenticator for `mode`.
///
/// `sessions` is only used in bearer mode.
#[must_use]
pub fn build_authenticator<S>(
    mode: AuthMode,
    sessions: Arc<SessionManager<S>>,
) -> Arc<dyn Authenticator>
where
    S: CredentialStorePort + ?Sized + 'static,
{
    match mode {
        AuthMode::Bearer => Arc::new(BearerAuthenticator::new(sessions)),
        AuthMode::Mtls => Arc::new(MtlsAuthenticator::new()),
    }
}
