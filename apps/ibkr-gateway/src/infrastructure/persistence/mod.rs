//! Persistence Adapters
//!
//! `PostgresCredentialStore` implements `CredentialStorePort` for production.
//! The in-memory store lives beside the port definition.

mod postgres;

pub use postgres::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_LIFETIME, DEFAULT_MIN_CONNECTIONS,
    PoolSettings, PostgresCredentialStore,
};
