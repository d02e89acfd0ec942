//! PostgreSQL credential store.
//!
//! Uses `PostgreSQL` via `SQLx` with runtime-checked queries. Expiry is
//! filtered inside the lookup query, so an expired row is never returned even
//! before the sweeper removes it.
//!
//! Writes go to the primary pool. Lookups go to the read pool, which is the
//! primary itself unless a separate read DSN is configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::application::ports::CredentialStorePort;
use crate::domain::crypto::TokenHash;
use crate::domain::session::{NewSession, Session, StoreError};

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 25;

/// Default idle connections kept open.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 5;

/// Default lifetime of a pooled connection.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Default idle time before a pooled connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Postgres SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS sessions (
        id BIGSERIAL PRIMARY KEY,
        account_id TEXT NOT NULL,
        session_token_encrypted BYTEA NOT NULL,
        session_token_hash TEXT NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
";

const EXPIRES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions (expires_at)";

/// Pool sizing and connection recycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Recycle connections older than this.
    pub max_lifetime: Duration,
    /// Close connections idle longer than this.
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolSettings {
    /// Settings with a custom pool size and default recycling.
    #[must_use]
    pub fn with_max_connections(max_connections: u32) -> Self {
        Self {
            max_connections,
            min_connections: DEFAULT_MIN_CONNECTIONS.min(max_connections),
            ..Self::default()
        }
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
    }
}

/// Session store backed by `PostgreSQL` pools.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    write: PgPool,
    read: PgPool,
}

impl PostgresCredentialStore {
    /// Connect to a single database with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with(database_url, None, PoolSettings::default()).await
    }

    /// Connect to a single database with a custom pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        Self::connect_with(database_url, None, PoolSettings::with_max_connections(max_connections))
            .await
    }

    /// Connect the write pool and, when `read_url` differs, a read pool.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be connected.
    pub async fn connect_with(
        write_url: &str,
        read_url: Option<&str>,
        settings: PoolSettings,
    ) -> Result<Self, StoreError> {
        let write = open_pool(write_url, &settings).await?;
        let read = match read_url {
            Some(url) if url != write_url => open_pool(url, &settings).await?,
            _ => write.clone(),
        };

        info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            read_replica = read_url.is_some_and(|url| url != write_url),
            "PostgreSQL connection pool initialized"
        );

        Ok(Self { write, read })
    }

    /// Wrap an existing pool used for reads and writes.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            read: pool.clone(),
            write: pool,
        }
    }

    /// Wrap separate write and read pools.
    #[must_use]
    pub const fn with_pools(write: PgPool, read: PgPool) -> Self {
        Self { write, read }
    }

    /// Primary pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.write
    }

    /// Pool used for lookups.
    #[must_use]
    pub const fn read_pool(&self) -> &PgPool {
        &self.read
    }

    /// Create the `sessions` table and its expiry index if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if either statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in [SCHEMA, EXPIRES_INDEX] {
            sqlx::query(statement)
                .execute(&self.write)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.write.close().await;
        self.read.close().await;
    }
}

async fn open_pool(url: &str, settings: &PoolSettings) -> Result<PgPool, StoreError> {
    settings
        .options()
        .connect(url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    Ok(())
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: row
            .try_get::<i64, _>("id")
            .map_err(|e| StoreError::MissingField(format!("id: {e}")))?,
        identity: row
            .try_get::<String, _>("account_id")
            .map_err(|e| StoreError::MissingField(format!("account_id: {e}")))?,
        encrypted_token: row
            .try_get::<Vec<u8>, _>("session_token_encrypted")
            .map_err(|e| StoreError::MissingField(format!("session_token_encrypted: {e}")))?,
        token_hash: TokenHash::from_hex(
            row.try_get::<String, _>("session_token_hash")
                .map_err(|e| StoreError::MissingField(format!("session_token_hash: {e}")))?,
        ),
        expires_at: row
            .try_get::<DateTime<Utc>, _>("expires_at")
            .map_err(|e| StoreError::MissingField(format!("expires_at: {e}")))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| StoreError::MissingField(format!("created_at: {e}")))?,
    })
}

fn map_insert_error(err: &sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = err
        && db.code().as_deref() == Some(UNIQUE_VIOLATION)
    {
        return StoreError::DuplicateHash;
    }
    StoreError::Query(err.to_string())
}

#[async_trait]
impl CredentialStorePort for PostgresCredentialStore {
    async fn create(&self, session: NewSession) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO sessions (
                account_id, session_token_encrypted, session_token_hash, expires_at
            ) VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, session_token_encrypted, session_token_hash,
                      expires_at, created_at
            ",
        )
        .bind(&session.identity)
        .bind(&session.encrypted_token)
        .bind(session.token_hash.as_str())
        .bind(session.expires_at)
        .fetch_one(&self.write)
        .await
        .map_err(|e| map_insert_error(&e))?;

        session_from_row(&row)
    }

    async fn get_by_hash(&self, hash: &TokenHash) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, account_id, session_token_encrypted, session_token_hash,
                   expires_at, created_at
            FROM sessions
            WHERE session_token_hash = $1 AND expires_at > NOW()
            ",
        )
        .bind(hash.as_str())
        .fetch_optional(&self.read)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE session_token_hash = $1")
            .bind(hash.as_str())
            .execute(&self.write)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.write)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn health(&self) -> Result<(), StoreError> {
        ping(&self.write).await?;
        ping(&self.read).await
    }
}

// Requires a live database: TEST_DATABASE_URL=postgres://... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::crypto::hash_token;

    async fn store() -> PostgresCredentialStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let store = PostgresCredentialStore::with_max_connections(&url, 2)
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn new_session(token: &str, expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            identity: "U-pg".to_string(),
            encrypted_token: vec![1, 2, 3, 4],
            token_hash: hash_token(token),
            expires_at,
        }
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_round_trip() {
        let store = store().await;
        let token = format!("pg-round-trip-{}", Utc::now().timestamp_nanos_opt().unwrap());
        let created = store
            .create(new_session(&token, Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let found = store.get_by_hash(&hash_token(&token)).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.encrypted_token, vec![1, 2, 3, 4]);

        store.delete_by_hash(&hash_token(&token)).await.unwrap();
        store.delete_by_hash(&hash_token(&token)).await.unwrap();
        assert!(store.get_by_hash(&hash_token(&token)).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_filters_and_sweeps_expired() {
        let store = store().await;
        let token = format!("pg-expired-{}", Utc::now().timestamp_nanos_opt().unwrap());
        store
            .create(new_session(&token, Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(store.get_by_hash(&hash_token(&token)).await.unwrap().is_none());
        assert!(store.delete_expired().await.unwrap() >= 1);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_duplicate_hash() {
        let store = store().await;
        let token = format!("pg-dup-{}", Utc::now().timestamp_nanos_opt().unwrap());
        let expires = Utc::now() + Duration::hours(1);
        store.create(new_session(&token, expires)).await.unwrap();

        let result = store.create(new_session(&token, expires)).await;
        assert_eq!(result, Err(StoreError::DuplicateHash));
        store.delete_by_hash(&hash_token(&token)).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_health() {
        store().await.health().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_read_pool_sees_writes() {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let store = PostgresCredentialStore::connect_with(
            &url,
            Some(&url),
            PoolSettings::with_max_connections(2),
        )
        .await
        .unwrap();
        store.migrate().await.unwrap();

        let token = format!("pg-read-{}", Utc::now().timestamp_nanos_opt().unwrap());
        store
            .create(new_session(&token, Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(store.get_by_hash(&hash_token(&token)).await.unwrap().is_some());
        store.delete_by_hash(&hash_token(&token)).await.unwrap();
    }

    #[test]
    fn pool_settings_defaults() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_connections, 25);
        assert_eq!(settings.min_connections, 5);
        assert_eq!(settings.max_lifetime, std::time::Duration::from_secs(3600));
        assert_eq!(settings.idle_timeout, std::time::Duration::from_secs(1800));
    }

    #[test]
    fn small_pool_clamps_min_connections() {
        let settings = PoolSettings::with_max_connections(2);
        assert_eq!(settings.max_connections, 2);
        assert_eq!(settings.min_connections, 2);
    }
}
