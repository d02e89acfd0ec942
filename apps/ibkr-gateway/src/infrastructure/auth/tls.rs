//! mTLS Server Configuration
//!
//! Builds the rustls server config for mTLS deployments. The server presents
//! its own certificate, speaks TLS 1.3 only and refuses any handshake that
//! lacks a client certificate signed by the configured CA, so by the time a
//! request reaches [`AuthLayer`](super::AuthLayer) its peer chain is verified.
//!
//! # Configuration
//!
//! - `MTLS_SERVER_CERT_PATH`: server certificate (PEM)
//! - `MTLS_SERVER_KEY_PATH`: server private key (PEM)
//! - `MTLS_CA_CERT_PATH`: CA that signs client certificates (PEM)

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// ALPN protocol for gRPC.
const ALPN_H2: &[u8] = b"h2";

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Failed to read a certificate or key file.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// File did not contain PEM data.
    #[error("{0} does not contain a PEM block")]
    NotPem(&'static str),

    /// Certificate PEM could not be decoded or trusted.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Private key PEM could not be decoded.
    #[error("private key error: {0}")]
    PrivateKey(String),

    /// rustls refused the assembled configuration.
    #[error("TLS configuration error: {0}")]
    Config(String),
}

/// Server identity plus the trust anchor for client certificates.
#[derive(Clone)]
pub struct MtlsConfig {
    /// Server certificate chain (PEM).
    pub cert: String,
    /// Server private key (PEM).
    pub key: String,
    /// CA certificate that client certificates must chain to (PEM).
    pub ca_cert: String,
}

impl std::fmt::Debug for MtlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtlsConfig")
            .field("cert_bytes", &self.cert.len())
            .field("key", &"[REDACTED]")
            .field("ca_cert_bytes", &self.ca_cert.len())
            .finish()
    }
}

impl MtlsConfig {
    /// Load PEM files.
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        ca_path: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        Self::from_pem(
            read_pem(cert_path.as_ref())?,
            read_pem(key_path.as_ref())?,
            read_pem(ca_path.as_ref())?,
        )
    }

    /// Build from PEM strings.
    pub fn from_pem(
        cert: impl Into<String>,
        key: impl Into<String>,
        ca_cert: impl Into<String>,
    ) -> Result<Self, TlsError> {
        let config = Self {
            cert: cert.into(),
            key: key.into(),
            ca_cert: ca_cert.into(),
        };
        for (name, pem) in [
            ("server certificate", &config.cert),
            ("server key", &config.key),
            ("CA certificate", &config.ca_cert),
        ] {
            if !pem.contains("-----BEGIN ") {
                return Err(TlsError::NotPem(name));
            }
        }
        Ok(config)
    }

    /// Build the rustls server config: TLS 1.3 only, client certificate
    /// mandatory and chained to the CA, `h2` advertised over ALPN.
    pub fn build_server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let ca_certs = parse_certificates(self.ca_cert.as_bytes())?;
        if ca_certs.is_empty() {
            return Err(TlsError::Certificate("no CA certificates found".into()));
        }
        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert).map_err(|e| {
                TlsError::Certificate(format!("failed to add CA certificate: {e}"))
            })?;
        }

        let chain = parse_certificates(self.cert.as_bytes())?;
        if chain.is_empty() {
            return Err(TlsError::Certificate("no server certificates found".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(self.key.as_bytes())
            .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {e}")))?;

        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(|e| TlsError::Config(format!("client verifier error: {e}")))?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| TlsError::Config(e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .map_err(|e| TlsError::Config(format!("server certificate rejected: {e}")))?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        tracing::info!("mTLS enabled: TLS 1.3, client certificates required");
        Ok(Arc::new(config))
    }

    /// Acceptor for inbound connections.
    pub fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        Ok(TlsAcceptor::from(self.build_server_config()?))
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))
}

fn read_pem(path: &Path) -> Result<String, TlsError> {
    fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}
