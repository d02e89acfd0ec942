//! Application Ports
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialStorePort`: persistence of session records

mod credential_store_port;

#[cfg(test)]
pub use credential_store_port::MockCredentialStorePort;
pub use credential_store_port::{CredentialStorePort, InMemoryCredentialStore};
