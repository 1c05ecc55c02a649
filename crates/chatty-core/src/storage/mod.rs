//! Persistent storage connection
//!
//! The backend only needs to open, probe and re-open its database connection;
//! schema and queries live with the features that use them. The
//! [`StorageSupervisor`] owns the connection lifecycle after startup.

mod sql;
mod supervisor;

pub use sql::{SqlStorage, SqlStorageOptions};
pub use supervisor::{StorageState, StorageSupervisor};

use crate::error::StorageError;
use async_trait::async_trait;

/// A database reachable by URL
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open (or re-open) the connection
    async fn connect(&self) -> Result<(), StorageError>;

    /// Cheap round trip proving the connection is usable
    async fn ping(&self) -> Result<(), StorageError>;

    /// Close the connection
    async fn disconnect(&self);
}
