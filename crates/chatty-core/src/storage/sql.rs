use super::Storage;
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::{Once, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

static INSTALL_DRIVERS: Once = Once::new();

/// Pool settings for [`SqlStorage`]
#[derive(Debug, Clone)]
pub struct SqlStorageOptions {
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a connection (also bounds connect and ping)
    pub acquire_timeout: Duration,
}

impl Default for SqlStorageOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// SQL database behind the sqlx `Any` driver (postgres or sqlite)
pub struct SqlStorage {
    url: String,
    options: SqlStorageOptions,
    pool: RwLock<Option<AnyPool>>,
}

impl SqlStorage {
    /// Create a storage for `url`; nothing is opened until `connect`
    #[must_use]
    pub fn new(url: impl Into<String>, options: SqlStorageOptions) -> Self {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self {
            url: url.into(),
            options,
            pool: RwLock::new(None),
        }
    }

    /// The open pool, if connected
    #[must_use]
    pub fn pool(&self) -> Option<AnyPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URL scheme, safe to log
    fn scheme(&self) -> &str {
        self.url.split(':').next().unwrap_or("unknown")
    }
}

impl std::fmt::Debug for SqlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStorage")
            .field("scheme", &self.scheme())
            .field("options", &self.options)
            .field("connected", &self.pool().is_some())
            .finish()
    }
}

#[async_trait]
impl Storage for SqlStorage {
    async fn connect(&self) -> Result<(), StorageError> {
        let pool = AnyPoolOptions::new()
            .max_connections(self.options.max_connections)
            .acquire_timeout(self.options.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let previous = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        if let Some(previous) = previous {
            previous.close().await;
            debug!("Closed previous storage pool");
        }

        info!(scheme = %self.scheme(), "Storage pool opened");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let pool = self.pool().ok_or(StorageError::NotConnected)?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Ping(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("Storage pool closed");
        }
    }
}
