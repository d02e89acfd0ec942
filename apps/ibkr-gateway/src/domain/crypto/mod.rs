//! Token Cryptography
//!
//! Sealing of session tokens at rest and the digest used to look them up.

mod cipher;
mod hasher;

pub use cipher::{
    CipherError, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE, decrypt_token, encrypt_token,
};
pub use hasher::{TOKEN_HASH_LEN, TokenHash, hash_token};
