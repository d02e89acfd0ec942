//! Infrastructure Layer - Adapters for transport, storage and runtime.
//!
//! Implements the application ports and wires the gateway into tonic:
//! request authentication, gRPC hosting, health probes, gRPC status
//! mapping, the Postgres credential store, environment configuration and
//! tracing setup.

/// Bearer and mTLS request authentication.
pub mod auth;

/// Environment configuration.
pub mod config;

/// gRPC status mapping for gateway errors.
pub mod error;

/// Liveness and readiness probes.
pub mod health;

/// Credential store adapters.
pub mod persistence;

/// gRPC server with TLS accept loop and request logging.
pub mod server;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
