//! Health Check Endpoint
//!
//! Plain HTTP probes for container orchestrators and load balancers.
//!
//! # Endpoints
//!
//! - `GET /healthz` - Liveness probe (always `OK` while the process serves)
//! - `GET /readyz` - Readiness probe (pings the credential store)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CredentialStorePort;

/// Longest a readiness check waits on the store.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    store: Arc<dyn CredentialStorePort>,
    readiness_timeout: Duration,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStorePort>, readiness_timeout: Duration) -> Self {
        Self {
            store,
            readiness_timeout,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Probe routes over `state`.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    match tokio::time::timeout(state.readiness_timeout, state.store.health()).await {
        Ok(Ok(())) => (StatusCode::OK, "Ready"),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Database unhealthy")
        }
        Err(_) => {
            tracing::error!(
                timeout_ms = u64::try_from(state.readiness_timeout.as_millis()).unwrap_or(u64::MAX),
                "Database health check timed out"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "Database unhealthy")
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to the port.
    #[error("failed to bind health server to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error while running.
    #[error("health server error: {0}")]
    ServerFailed(String),
}
