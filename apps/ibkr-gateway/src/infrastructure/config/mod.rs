//! Configuration Module
//!
//! Environment-driven configuration for the gateway.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_GRPC_PORT, DEFAULT_HTTP_PORT, DatabaseSettings, GatewayConfig,
    KeyMaterial, MtlsPaths, ServerSettings, SessionConfig, decode_encryption_key,
};
