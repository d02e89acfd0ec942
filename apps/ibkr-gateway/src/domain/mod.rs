//! Domain Layer - Session and identity types with no I/O.
//!
//! Token sealing, token digests, session records and certificate identity
//! resolution. Nothing in this layer touches the network or a database.

/// Token encryption and hashing.
pub mod crypto;

/// Client certificate identity resolution.
pub mod identity;

/// Session records, tokens and errors.
pub mod session;
