//! Token Cipher
//!
//! AES-256-GCM sealing of session tokens at rest.
//!
//! # Wire Layout
//!
//! ```text
//! ┌────────────┬──────────────────────┬───────────┐
//! │ nonce (12) │ ciphertext (len(p))  │ tag (16)  │
//! └────────────┴──────────────────────┴───────────┘
//! ```
//!
//! A fresh nonce is drawn from the operating system RNG on every call, so
//! sealing the same plaintext twice never yields the same bytes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::TryRngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Required key length in bytes.
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while sealing or opening a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// Key is not exactly [`KEY_SIZE`] bytes.
    #[error("encryption key must be {KEY_SIZE} bytes, got {actual}")]
    InvalidKeySize {
        /// Length of the rejected key.
        actual: usize,
    },

    /// The operating system could not supply random bytes for a nonce.
    #[error("secure randomness unavailable")]
    RandomnessFailure,

    /// The AEAD refused to seal the input.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Ciphertext is shorter than a nonce.
    #[error("ciphertext too short: {len} bytes")]
    Malformed {
        /// Length of the rejected input.
        len: usize,
    },

    /// Authentication tag did not verify.
    ///
    /// Covers both a wrong key and tampered bytes; the two are not
    /// distinguished.
    #[error("decryption failed")]
    DecryptionFailed,
}

// =============================================================================
// Encryption Key
// =============================================================================

/// Process-wide symmetric key for sealing session tokens.
///
/// Always exactly [`KEY_SIZE`] bytes. The bytes are wiped when the key is
/// dropped and never appear in `Debug` output.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl EncryptionKey {
    /// Build a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeySize`] unless `bytes` is exactly
    /// [`KEY_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let array: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeySize {
                actual: bytes.len(),
            })?;
        Ok(Self {
            bytes: Zeroizing::new(array),
        })
    }

    /// Generate a random key from the operating system RNG.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::RandomnessFailure`] if the RNG is unavailable.
    pub fn generate() -> Result<Self, CipherError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut *bytes)
            .map_err(|_| CipherError::RandomnessFailure)?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    /// Seal `plaintext` under this key.
    ///
    /// # Errors
    ///
    /// See [`encrypt_token`].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        encrypt_token(plaintext, self.as_bytes())
    }

    /// Open `ciphertext` sealed under this key.
    ///
    /// # Errors
    ///
    /// See [`decrypt_token`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        decrypt_token(ciphertext, self.as_bytes())
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Seal / Open
// =============================================================================

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_SIZE {
        return Err(CipherError::InvalidKeySize { actual: key.len() });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeySize { actual: key.len() })
}

/// Seal `plaintext` with AES-256-GCM under `key`.
///
/// Output is `nonce ‖ ciphertext ‖ tag`.
///
/// # Errors
///
/// - [`CipherError::InvalidKeySize`] if `key` is not 32 bytes.
/// - [`CipherError::RandomnessFailure`] if no nonce could be drawn.
pub fn encrypt_token(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CipherError::RandomnessFailure)?;

    // Sealing only fails for inputs beyond the GCM length limit.
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open bytes produced by [`encrypt_token`].
///
/// # Errors
///
/// - [`CipherError::InvalidKeySize`] if `key` is not 32 bytes.
/// - [`CipherError::Malformed`] if `ciphertext` is shorter than a nonce.
/// - [`CipherError::DecryptionFailed`] on any tag mismatch.
pub fn decrypt_token(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_SIZE {
        return Err(CipherError::Malformed {
            len: ciphertext.len(),
        });
    }

    let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| CipherError::DecryptionFailed)
}

// =============================================================================
// Tests
// =============================================================================
