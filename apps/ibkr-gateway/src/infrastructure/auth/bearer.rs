//! Bearer session authentication.

use std::sync::Arc;

use async_trait::async_trait;

use super::gate::{AuthFailure, AuthMode, Authenticator, RequestCredentials};
use crate::application::ports::CredentialStorePort;
use crate::application::services::SessionManager;

const BEARER_SCHEME: &str = "bearer";

/// Extract the token from an `Authorization` header value.
///
/// The header is split once on the first space. The scheme must equal
/// `bearer` ignoring case, and everything after the space is the token.
/// Any other shape yields the empty string.
#[must_use]
pub fn extract_bearer_token(header: Option<&str>) -> &str {
    let Some((scheme, token)) = header.and_then(|h| h.split_once(' ')) else {
        return "";
    };
    if scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        token
    } else {
        ""
    }
}

/// Validates bearer session tokens against a [`SessionManager`].
pub struct BearerAuthenticator<S: CredentialStorePort + ?Sized> {
    sessions: Arc<SessionManager<S>>,
}

impl<S: CredentialStorePort + ?Sized> BearerAuthenticator<S> {
    /// Create an authenticator backed by `sessions`.
    pub const fn new(sessions: Arc<SessionManager<S>>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl<S: CredentialStorePort + ?Sized> Authenticator for BearerAuthenticator<S> {
    fn mode(&self) -> AuthMode {
        AuthMode::Bearer
    }

    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<String, AuthFailure> {
        let token = extract_bearer_token(credentials.authorization.as_deref());
        if token.is_empty() {
            return Err(AuthFailure::MissingBearerToken);
        }
        Ok(self.sessions.validate(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::application::ports::{InMemoryCredentialStore, MockCredentialStorePort};
    use crate::domain::crypto::{EncryptionKey, KEY_SIZE};
    use crate::domain::session::SessionError;

    #[test_case(Some("Bearer abc"), "abc" ; "canonical")]
    #[test_case(Some("bearer ABC"), "ABC" ; "lowercase scheme")]
    #[test_case(Some("BEARER xyz"), "xyz" ; "uppercase scheme")]
    #[test_case(Some("Bearer"), "" ; "scheme only")]
    #[test_case(Some("Bearer "), "" ; "empty token")]
    #[test_case(Some("Basic abc"), "" ; "other scheme")]
    #[test_case(Some(""), "" ; "empty header")]
    #[test_case(None, "" ; "absent header")]
    #[test_case(Some("   "), "" ; "whitespace only")]
    #[test_case(Some("Bearer token with spaces"), "token with spaces" ; "split once")]
    #[test_case(Some("Bearer\tabc"), "" ; "tab separator")]
    fn test_extract_bearer_token(header: Option<&str>, expected: &str) {
        assert_eq!(extract_bearer_token(header), expected);
    }

    fn sessions<S: CredentialStorePort>(store: S) -> Arc<SessionManager<S>> {
        let key = EncryptionKey::from_bytes(&[5u8; KEY_SIZE]).unwrap();
        Arc::new(SessionManager::new(Arc::new(store), key))
    }

    #[tokio::test]
    async fn test_valid_session_resolves() {
        let sessions = sessions(InMemoryCredentialStore::new());
        let token = sessions.create("U1").await.unwrap();
        let auth = BearerAuthenticator::new(Arc::clone(&sessions));

        let creds = RequestCredentials::bearer(format!("Bearer {}", token.expose()));
        assert_eq!(auth.authenticate(&creds).await.unwrap(), "U1");
    }

    #[tokio::test]
    async fn test_malformed_header_skips_store() {
        let mut store = MockCredentialStorePort::new();
        store.expect_get_by_hash().never();
        let auth = BearerAuthenticator::new(sessions(store));

        for creds in [
            RequestCredentials::default(),
            RequestCredentials::bearer("Basic dXNlcjpwYXNz"),
            RequestCredentials::bearer("Bearer"),
        ] {
            assert_eq!(
                auth.authenticate(&creds).await,
                Err(AuthFailure::MissingBearerToken)
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_token_not_found() {
        let auth = BearerAuthenticator::new(sessions(InMemoryCredentialStore::new()));
        let result = auth
            .authenticate(&RequestCredentials::bearer("Bearer nope"))
            .await;
        assert_eq!(
            result,
            Err(AuthFailure::Session(SessionError::SessionNotFound))
        );
    }

    #[tokio::test]
    async fn test_peer_certificate_ignored_in_bearer_mode() {
        let auth = BearerAuthenticator::new(sessions(InMemoryCredentialStore::new()));
        let creds = RequestCredentials::peer_certificate(vec![0x30, 0x82]);
        assert_eq!(
            auth.authenticate(&creds).await,
            Err(AuthFailure::MissingBearerToken)
        );
    }
}
