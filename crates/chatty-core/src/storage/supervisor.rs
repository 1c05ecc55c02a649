use super::Storage;
use crate::error::StorageError;
use crate::utils::{reconnect_with_backoff, ReconnectPolicy};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Connection state of the persistent store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    /// Initial connect or reconnect in progress
    Connecting,
    /// Last connect or ping succeeded
    Connected,
    /// Connection lost or never established
    Disconnected,
}

/// Owns the storage connection lifecycle.
///
/// The first connect happens during bootstrap and is fatal on failure. After
/// that, [`StorageSupervisor::spawn_monitor`] pings on an interval and
/// reconnects with backoff when the connection drops, while HTTP keeps serving.
pub struct StorageSupervisor {
    storage: Arc<dyn Storage>,
    policy: ReconnectPolicy,
    health_interval: Duration,
    state: watch::Sender<StorageState>,
    reconnect_attempts: AtomicU32,
}

impl StorageSupervisor {
    /// Create a supervisor; call [`StorageSupervisor::connect`] before use
    pub fn new(storage: Arc<dyn Storage>, policy: ReconnectPolicy, health_interval: Duration) -> Self {
        let (state, _) = watch::channel(StorageState::Connecting);
        Self {
            storage,
            policy,
            health_interval,
            state,
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Initial connection
    ///
    /// # Errors
    ///
    /// Returns the storage error; bootstrap treats it as fatal
    pub async fn connect(&self) -> Result<(), StorageError> {
        match self.storage.connect().await {
            Ok(()) => {
                self.state.send_replace(StorageState::Connected);
                info!("Successfully connected to database");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(StorageState::Disconnected);
                error!(error = %e, "Error connecting to database");
                Err(e)
            }
        }
    }

    /// Start the health monitor; it stops when `token` is cancelled
    pub fn spawn_monitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(
            async move { supervisor.monitor(token).await }.instrument(info_span!("storage")),
        )
    }

    async fn monitor(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.health_interval) => {}
                _ = token.cancelled() => break,
            }

            match self.storage.ping().await {
                Ok(()) => {
                    if self.state() != StorageState::Connected {
                        self.state.send_replace(StorageState::Connected);
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Database connection lost, reconnecting");
                    self.state.send_replace(StorageState::Disconnected);
                }
            }

            let restored = reconnect_with_backoff(
                &self.policy,
                "database",
                &token,
                |_| {
                    self.state.send_replace(StorageState::Disconnected);
                },
                || {
                    self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                    self.state.send_replace(StorageState::Connecting);
                    self.storage.connect()
                },
            )
            .await;

            match restored {
                Some(()) => {
                    self.state.send_replace(StorageState::Connected);
                }
                None => break,
            }
        }
        debug!("Storage monitor stopped");
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> StorageState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StorageState> {
        self.state.subscribe()
    }

    /// Whether the store is currently usable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == StorageState::Connected
    }

    /// Reconnect attempts made since startup
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Probe the store without touching the supervised state
    ///
    /// # Errors
    ///
    /// Returns the storage error from the round trip
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.storage.ping().await
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        self.storage.disconnect().await;
        self.state.send_replace(StorageState::Disconnected);
    }
}

impl std::fmt::Debug for StorageSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSupervisor")
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}
