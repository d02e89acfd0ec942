//! Client certificate authentication.
//!
//! The TLS layer has already rejected handshakes without a client
//! certificate signed by the configured CA, so any certificate seen here is
//! trusted. This module only turns it into a principal name.

use async_trait::async_trait;

use super::gate::{AuthFailure, AuthMode, Authenticator, RequestCredentials};
use crate::domain::identity::extract_identity_from_der;

/// Resolves the caller from its verified client certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MtlsAuthenticator;

impl MtlsAuthenticator {
    /// Create an authenticator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for MtlsAuthenticator {
    fn mode(&self) -> AuthMode {
        AuthMode::Mtls
    }

    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<String, AuthFailure> {
        // No TLS and TLS without a client cert look the same from here.
        let der = credentials
            .peer_certificate
            .as_deref()
            .ok_or(AuthFailure::MissingPeerCertificate)?;

        let identity = extract_identity_from_der(Some(der));
        if identity.is_empty() {
            return Err(AuthFailure::EmptyIdentity);
        }

        tracing::info!(client = %identity, "mTLS authentication successful");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    use super::*;

    fn cert(common_name: Option<&str>, dns: &[&str]) -> Vec<u8> {
        let mut params =
            CertificateParams::new(dns.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = common_name {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params
            .self_signed(&KeyPair::generate().unwrap())
            .unwrap()
            .der()
            .to_vec()
    }

    #[tokio::test]
    async fn resolves_common_name() {
        let creds = RequestCredentials::peer_certificate(cert(Some("trader-1"), &["t1.local"]));
        let identity = MtlsAuthenticator::new().authenticate(&creds).await.unwrap();
        assert_eq!(identity, "trader-1");
    }

    #[tokio::test]
    async fn resolves_dns_name_without_cn() {
        let creds = RequestCredentials::peer_certificate(cert(None, &["svc.internal", "b"]));
        let identity = MtlsAuthenticator::new().authenticate(&creds).await.unwrap();
        assert_eq!(identity, "svc.internal");
    }

    #[tokio::test]
    async fn missing_certificate_rejected() {
        let result = MtlsAuthenticator::new()
            .authenticate(&RequestCredentials::default())
            .await;
        assert_eq!(result, Err(AuthFailure::MissingPeerCertificate));
    }

    #[tokio::test]
    async fn bearer_header_ignored_in_mtls_mode() {
        let result = MtlsAuthenticator::new()
            .authenticate(&RequestCredentials::bearer("Bearer abc"))
            .await;
        assert_eq!(result, Err(AuthFailure::MissingPeerCertificate));
    }

    #[tokio::test]
    async fn certificate_without_identity_rejected() {
        let creds = RequestCredentials::peer_certificate(cert(None, &[]));
        let result = MtlsAuthenticator::new().authenticate(&creds).await;
        assert_eq!(result, Err(AuthFailure::EmptyIdentity));
    }
}
