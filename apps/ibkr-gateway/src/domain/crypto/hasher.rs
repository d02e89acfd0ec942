//! Token Hasher
//!
//! SHA-256 digest of a session token, hex encoded. The digest is the lookup
//! key for stored sessions; it is an index, not a secret.

use sha2::{Digest, Sha256};

/// Length of a hex encoded token hash.
pub const TOKEN_HASH_LEN: usize = 64;

/// Hex encoded SHA-256 digest of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenHash(String);

impl TokenHash {
    /// Wrap an already computed hex digest (e.g. read back from storage).
    #[must_use]
    pub const fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    /// The digest as lowercase hex.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the hex string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a token for indexed lookup.
#[must_use]
pub fn hash_token(token: &str) -> TokenHash {
    TokenHash(hex::encode(Sha256::digest(token.as_bytes())))
}
