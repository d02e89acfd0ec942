//! IBKR Gateway Binary
//!
//! Boots the session and identity core: connects the credential store,
//! serves gRPC behind the configured authenticator, exposes health probes
//! and runs the expired-session sweeper until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ibkr-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ENCRYPTION_KEY`: 32-byte session encryption key (raw or `base64:`)
//! - `DB_WRITE_DSN`: Postgres DSN
//!
//! ## Optional
//! - `AUTH_MODE`: bearer | mtls (default: bearer)
//! - `APP_GRPC_PORT`: gRPC port (default: 50051)
//! - `APP_HTTP_PORT`: health probe port (default: 8080)
//! - `DB_READ_DSN`: Postgres DSN for lookups (default: `DB_WRITE_DSN`)
//! - `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`
//! - `SESSION_TTL_SECS`, `SESSION_STORE_TIMEOUT_MS`, `SESSION_SWEEP_INTERVAL_SECS`
//! - `MTLS_CA_CERT_PATH`, `MTLS_SERVER_CERT_PATH`, `MTLS_SERVER_KEY_PATH` (mtls mode)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ibkr_gateway::infrastructure::health::{
    DEFAULT_READINESS_TIMEOUT, HealthServer, HealthServerState,
};
use ibkr_gateway::infrastructure::server::{self, GatewayServer};
use ibkr_gateway::infrastructure::telemetry;
use ibkr_gateway::{
    AuthLayer, AuthMode, AuthenticationGate, CredentialStorePort, GatewayConfig,
    PostgresCredentialStore, SessionManager, SessionSweeper, build_authenticator,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    let config = GatewayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let key = config.encryption_key.encryption_key()?;

    let store = Arc::new(
        PostgresCredentialStore::connect_with(
            &config.database.dsn,
            config.database.read_dsn.as_deref(),
            config.database.pool_settings(),
        )
        .await
        .context("failed to connect credential store")?,
    );
    store.migrate().await.context("failed to migrate sessions table")?;

    let sessions = Arc::new(SessionManager::with_settings(
        Arc::clone(&store),
        key,
        config.session.manager_settings(),
    ));

    let gate = AuthenticationGate::new(build_authenticator(
        config.auth_mode,
        Arc::clone(&sessions),
    ));

    let shutdown_token = CancellationToken::new();

    let mut grpc_server = GatewayServer::new(AuthLayer::new(gate), shutdown_token.clone());
    if let (AuthMode::Mtls, Some(paths)) = (config.auth_mode, &config.mtls) {
        grpc_server = grpc_server.with_tls(paths.load()?.acceptor()?);
    }
    let grpc_listener = server::bind(config.server.grpc_port).await?;
    // Brokerage services register here.
    let routes = RoutesBuilder::default().routes();
    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = grpc_server.serve(grpc_listener, routes).await {
            tracing::error!(error = %e, "gRPC server error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        Arc::clone(&store) as Arc<dyn CredentialStorePort>,
        DEFAULT_READINESS_TIMEOUT,
    ));
    let health_server = HealthServer::new(
        config.server.http_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let sweeper_handle = config.session.sweeper_enabled().then(|| {
        let sweeper = SessionSweeper::new(
            Arc::clone(&sessions),
            config.session.sweep_interval,
            shutdown_token.clone(),
        );
        tokio::spawn(async move { sweeper.run().await })
    });

    tracing::info!(
        app = %config.app_name,
        auth_mode = config.auth_mode.as_str(),
        grpc_port = config.server.grpc_port,
        http_port = config.server.http_port,
        "Gateway ready"
    );

    await_shutdown(shutdown_token).await;

    for (name, handle) in [("gRPC server", grpc_handle), ("health server", health_handle)] {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
            tracing::warn!(task = name, "Task did not stop before shutdown timeout");
        }
    }

    if let Some(handle) = sweeper_handle {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(stats)) => tracing::info!(
                sweeps = stats.sweeps,
                failures = stats.failures,
                removed = stats.removed,
                "Sweeper stopped"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Sweeper task failed"),
            Err(_) => tracing::warn!("Sweeper did not stop before shutdown timeout"),
        }
    }

    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        app = %config.app_name,
        environment = %config.app_env,
        auth_mode = config.auth_mode.as_str(),
        grpc_port = config.server.grpc_port,
        http_port = config.server.http_port,
        db_max_connections = config.database.max_connections,
        db_min_connections = config.database.min_connections,
        db_read_replica = config.database.read_dsn.is_some(),
        session_ttl_secs = config.session.ttl.as_secs(),
        store_timeout_ms = u64::try_from(config.session.store_timeout.as_millis()).unwrap_or(u64::MAX),
        sweep_interval_secs = config.session.sweep_interval.as_secs(),
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
