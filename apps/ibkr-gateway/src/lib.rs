#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! IBKR Gateway - Session and Identity Core
//!
//! Authenticates every inbound gRPC request before it reaches a brokerage
//! handler. Callers present either a bearer session token, validated against
//! encrypted records in Postgres, or a client certificate verified during the
//! TLS handshake.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `crypto`: AES-256-GCM token sealing, SHA-256 lookup digests
//!   - `session`: Session records, tokens, error classes
//!   - `identity`: Client certificate identity resolution
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Credential store interface plus an in-memory implementation
//!   - `services`: Session manager and expired-session sweeper
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `auth`: Bearer/mTLS authenticators, the tower layer, TLS 1.3 config
//!   - `server`: tonic hosting, TLS accept loop, request logging
//!   - `health`: Liveness and readiness probes
//!   - `persistence`: Postgres credential store
//!   - `error`: gRPC status mapping
//!   - `config`: Environment configuration
//!   - `telemetry`: Tracing and OTLP export
//!
//! # Request Flow
//!
//! ```text
//!  TLS 1.3 + client cert (mtls) or plaintext (bearer)
//!                           │
//!                    ┌──────▼───────┐     ┌───────────────┐
//! gRPC request ─────►│  AuthLayer   │────►│ Authenticator │
//!                    └──────┬───────┘     └───────┬───────┘
//!                           │                     │ bearer: hash → store → decrypt → compare
//!                           │                     │ mtls:   peer cert → CN / SAN
//!                           ▼                     ▼
//!                 identity in extensions    UNAUTHENTICATED / INTERNAL
//!                           │
//!                           ▼
//!                    RequestLogLayer
//!                           │
//!                           ▼
//!                    gRPC handler
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Session and identity types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::crypto::{EncryptionKey, TokenHash, hash_token};
pub use domain::identity::{extract_identity, extract_identity_from_der};
pub use domain::session::{ErrorClass, Session, SessionError, SessionToken, StoreError};

// Application services
pub use application::ports::{CredentialStorePort, InMemoryCredentialStore};
pub use application::services::{SessionManager, SessionSettings, SessionSweeper, SweepStats};

// Authentication
pub use infrastructure::auth::{
    AuthLayer, AuthMode, AuthenticatedIdentity, AuthenticationGate, Authenticator, MtlsConfig,
    RequestCredentials, authenticated_identity, build_authenticator,
};

// Errors
pub use infrastructure::error::ErrorCode;

// Configuration
pub use infrastructure::config::{ConfigError, GatewayConfig};

// Persistence
pub use infrastructure::persistence::{PoolSettings, PostgresCredentialStore};

// Hosting
pub use infrastructure::health::{HealthServer, HealthServerState};
pub use infrastructure::server::{GatewayServer, RequestLogLayer, ServerError};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
