//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use crate::application::services::{
    DEFAULT_SESSION_TTL, DEFAULT_STORE_TIMEOUT, DEFAULT_SWEEP_INTERVAL, SessionSettings,
};
use crate::domain::crypto::{EncryptionKey, KEY_SIZE};
use crate::domain::session::ErrorClass;
use crate::infrastructure::auth::{AuthMode, MtlsConfig, TlsError};
use crate::infrastructure::persistence::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MIN_CONNECTIONS, PoolSettings,
};

const DEFAULT_APP_NAME: &str = "ibkr-gateway";
const DEFAULT_APP_ENV: &str = "local";

/// Default gRPC listen port.
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Default health probe port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
const BASE64_KEY_PREFIX: &str = "base64:";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// A port variable is not a number in `1..=65535`.
    #[error("invalid {0} {1:?}: expected a port number")]
    InvalidPort(String, String),

    /// `AUTH_MODE` is not a known mode.
    #[error("invalid AUTH_MODE {0:?}: expected bearer or mtls")]
    InvalidAuthMode(String),

    /// `ENCRYPTION_KEY` has a `base64:` prefix but does not decode.
    #[error("ENCRYPTION_KEY is not valid base64: {0}")]
    InvalidBase64(String),

    /// `ENCRYPTION_KEY` does not decode to exactly 32 bytes.
    #[error("ENCRYPTION_KEY must be {KEY_SIZE} bytes, got {actual}")]
    InvalidEncryptionKey {
        /// Decoded length.
        actual: usize,
    },

    /// mTLS material could not be loaded.
    #[error("mTLS configuration: {0}")]
    Tls(#[from] TlsError),
}

impl ConfigError {
    /// All configuration errors are fatal at startup.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Raw 32-byte encryption key material.
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<Vec<u8>>);

impl KeyMaterial {
    /// Build the cipher key.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is wrong; [`decode_encryption_key`]
    /// already checks this, so it only fires for hand-built values.
    pub fn encryption_key(&self) -> Result<EncryptionKey, ConfigError> {
        EncryptionKey::from_bytes(&self.0).map_err(|_| ConfigError::InvalidEncryptionKey {
            actual: self.0.len(),
        })
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Decode `ENCRYPTION_KEY`.
///
/// A `base64:` prefix selects standard base64; anything else is taken as raw
/// bytes. Either way the result must be exactly 32 bytes.
///
/// # Errors
///
/// Returns an error for bad base64 or a wrong length.
pub fn decode_encryption_key(raw: &str) -> Result<KeyMaterial, ConfigError> {
    let bytes = match raw.strip_prefix(BASE64_KEY_PREFIX) {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConfigError::InvalidBase64(e.to_string()))?,
        None => raw.as_bytes().to_vec(),
    };
    if bytes.len() != KEY_SIZE {
        return Err(ConfigError::InvalidEncryptionKey {
            actual: bytes.len(),
        });
    }
    Ok(KeyMaterial(Zeroizing::new(bytes)))
}

/// Credential store settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Primary Postgres DSN.
    pub dsn: String,
    /// Optional DSN for lookups; the primary serves reads when absent.
    pub read_dsn: Option<String>,
    /// Pool size.
    pub max_connections: u32,
    /// Idle connections kept open.
    pub min_connections: u32,
}

impl DatabaseSettings {
    /// Pool settings for both pools.
    #[must_use]
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            ..PoolSettings::default()
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("dsn", &"[REDACTED]")
            .field("read_dsn", &self.read_dsn.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

/// Listen ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC port.
    pub grpc_port: u16,
    /// Health probe port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: DEFAULT_GRPC_PORT,
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session lifetime.
    pub ttl: Duration,
    /// Per-call store deadline.
    pub store_timeout: Duration,
    /// Sweep period (zero = sweeper disabled).
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Settings for the session manager.
    #[must_use]
    pub const fn manager_settings(&self) -> SessionSettings {
        SessionSettings {
            ttl: self.ttl,
            store_timeout: self.store_timeout,
        }
    }

    /// Whether the periodic sweeper should run.
    #[must_use]
    pub const fn sweeper_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }
}

/// PEM file locations for mTLS mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtlsPaths {
    /// CA that signs client certificates.
    pub ca_cert: PathBuf,
    /// Server certificate.
    pub server_cert: PathBuf,
    /// Server private key.
    pub server_key: PathBuf,
}

impl MtlsPaths {
    /// Read the PEM files.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is unreadable or not PEM.
    pub fn load(&self) -> Result<MtlsConfig, ConfigError> {
        Ok(MtlsConfig::from_files(
            &self.server_cert,
            &self.server_key,
            &self.ca_cert,
        )?)
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Service name used in logs.
    pub app_name: String,
    /// Deployment label.
    pub app_env: String,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Session token encryption key.
    pub encryption_key: KeyMaterial,
    /// Listen ports.
    pub server: ServerSettings,
    /// Credential store settings.
    pub database: DatabaseSettings,
    /// Session lifecycle settings.
    pub session: SessionConfig,
    /// mTLS material locations, present only in mTLS mode.
    pub mtls: Option<MtlsPaths>,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_mode = match lookup("AUTH_MODE") {
            Some(raw) if !raw.trim().is_empty() => {
                AuthMode::parse(&raw).ok_or(ConfigError::InvalidAuthMode(raw))?
            }
            _ => AuthMode::default(),
        };

        let encryption_key = decode_encryption_key(&required(&lookup, "ENCRYPTION_KEY")?)?;

        let server = ServerSettings {
            grpc_port: parse_port(&lookup, "APP_GRPC_PORT", DEFAULT_GRPC_PORT)?,
            http_port: parse_port(&lookup, "APP_HTTP_PORT", DEFAULT_HTTP_PORT)?,
        };

        let database = DatabaseSettings {
            dsn: required(&lookup, "DB_WRITE_DSN")?,
            read_dsn: lookup("DB_READ_DSN").filter(|v| !v.trim().is_empty()),
            max_connections: parse_u32(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            min_connections: parse_u32(&lookup, "DB_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            ttl: parse_duration_secs(&lookup, "SESSION_TTL_SECS", defaults.ttl),
            store_timeout: parse_duration_millis(
                &lookup,
                "SESSION_STORE_TIMEOUT_MS",
                defaults.store_timeout,
            ),
            sweep_interval: parse_duration_secs(
                &lookup,
                "SESSION_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
            ),
        };

        let mtls = match auth_mode {
            AuthMode::Mtls => Some(MtlsPaths {
                ca_cert: required(&lookup, "MTLS_CA_CERT_PATH")?.into(),
                server_cert: required(&lookup, "MTLS_SERVER_CERT_PATH")?.into(),
                server_key: required(&lookup, "MTLS_SERVER_KEY_PATH")?.into(),
            }),
            AuthMode::Bearer => None,
        };

        Ok(Self {
            app_name: lookup("APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            app_env: lookup("APP_ENV").unwrap_or_else(|| DEFAULT_APP_ENV.to_string()),
            auth_mode,
            encryption_key,
            server,
            database,
            session,
            mtls,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_port<F>(lookup: &F, key: &str, default: u16) -> Result<u16, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort(key.to_string(), raw)),
        },
        _ => Ok(default),
    }
}

fn parse_u32<F>(lookup: &F, key: &str, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
