//! Expired Session Sweeper
//!
//! Calls [`SessionManager::cleanup_expired`] on a fixed interval until
//! cancelled. A failed sweep is logged and the next tick tries again; there
//! is no retry within a tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CredentialStorePort;
use crate::application::services::SessionManager;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Totals from a sweeper run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Sweeps attempted.
    pub sweeps: u64,
    /// Sweeps that failed.
    pub failures: u64,
    /// Sessions removed across all sweeps.
    pub removed: u64,
}

/// Periodic driver for expired session cleanup.
pub struct SessionSweeper<S: CredentialStorePort + ?Sized> {
    manager: Arc<SessionManager<S>>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<S: CredentialStorePort + ?Sized> SessionSweeper<S> {
    /// Create a sweeper. A zero interval selects [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(
        manager: Arc<SessionManager<S>>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };
        Self {
            manager,
            interval,
            shutdown,
        }
    }

    /// Effective sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep until the shutdown token is cancelled.
    ///
    /// The first sweep runs immediately.
    pub async fn run(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Session sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            stats.sweeps += 1;
            match self.manager.cleanup_expired().await {
                Ok(removed) => {
                    stats.removed += removed;
                    if removed > 0 {
                        tracing::info!(removed, "Expired sessions swept");
                    }
                }
                Err(e) => {
                    stats.failures += 1;
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        }

        tracing::info!(
            sweeps = stats.sweeps,
            removed = stats.removed,
            failures = stats.failures,
            "Session sweeper stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::application::ports::{InMemoryCredentialStore, MockCredentialStorePort};
    use crate::domain::crypto::{EncryptionKey, KEY_SIZE, hash_token};
    use crate::domain::session::{NewSession, StoreError};

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[3u8; KEY_SIZE]).unwrap()
    }

    fn expired(token: &str) -> NewSession {
        NewSession {
            identity: "U9".to_string(),
            encrypted_token: vec![0; 32],
            token_hash: hash_token(token),
            expires_at: Utc::now() - chrono::Duration::seconds(10),
        }
    }

    #[test]
    fn zero_interval_uses_default() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let manager = Arc::new(SessionManager::new(store, key()));
        let sweeper = SessionSweeper::new(manager, Duration::ZERO, CancellationToken::new());
        assert_eq!(sweeper.interval(), DEFAULT_SWEEP_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_sessions_until_cancelled() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let manager = Arc::new(SessionManager::new(Arc::clone(&store), key()));
        let live = manager.create("U1").await.unwrap();
        store.insert_raw(expired("a"));
        store.insert_raw(expired("b"));

        let shutdown = CancellationToken::new();
        let sweeper = SessionSweeper::new(
            Arc::clone(&manager),
            Duration::from_secs(60),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { sweeper.run().await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.sweeps, 3);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.failures, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(manager.validate(live.expose()).await.unwrap(), "U1");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_does_not_stop_the_loop() {
        let mut store = MockCredentialStorePort::new();
        let mut calls = 0;
        store.expect_delete_expired().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Connection("down".to_string()))
            } else {
                Ok(4)
            }
        });
        let manager = Arc::new(SessionManager::new(Arc::new(store), key()));

        let shutdown = CancellationToken::new();
        let sweeper = SessionSweeper::new(manager, Duration::from_secs(10), shutdown.clone());
        let handle = tokio::spawn(async move { sweeper.run().await });

        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.sweeps, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.removed, 4);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.insert_raw(expired("a"));
        let manager = Arc::new(SessionManager::new(Arc::clone(&store), key()));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = SessionSweeper::new(manager, Duration::from_secs(1), shutdown)
            .run()
            .await;

        assert_eq!(stats.sweeps, 0);
        assert_eq!(store.len(), 1);
    }
}
