//! Application Layer - Session orchestration and port definitions.
//!
//! Services here combine the domain's token cryptography with a credential
//! store reached through a port, so the same logic runs against Postgres in
//! production and an in-memory map in tests.

/// Port interfaces for external systems.
pub mod ports;

/// Session lifecycle services.
pub mod services;
