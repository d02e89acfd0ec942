//! Client Certificate Identity
//!
//! Derives the caller identity from a client certificate that the transport
//! has already chain-verified. Nothing here checks signatures or validity
//! periods.
//!
//! Resolution order:
//!
//! 1. Subject Common Name, if present and non-empty
//! 2. First DNS name in the Subject Alternative Name extension
//! 3. Empty string, which callers must treat as failure

use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Identity for a parsed certificate.
#[must_use]
pub fn extract_identity(cert: Option<&X509Certificate<'_>>) -> String {
    let Some(cert) = cert else {
        return String::new();
    };

    // Multiple CN attributes: the last one wins.
    let common_name = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .last()
        .unwrap_or_default();
    if !common_name.is_empty() {
        return common_name.to_string();
    }

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                return (*dns).to_string();
            }
        }
    }

    String::new()
}

/// Identity for a DER encoded certificate.
///
/// Unparseable input yields the empty string.
#[must_use]
pub fn extract_identity_from_der(der: Option<&[u8]>) -> String {
    let Some(der) = der else {
        return String::new();
    };
    match X509Certificate::from_der(der) {
        Ok((_, cert)) => extract_identity(Some(&cert)),
        Err(e) => {
            tracing::debug!(error = %e, "client certificate could not be parsed");
            String::new()
        }
    }
}
