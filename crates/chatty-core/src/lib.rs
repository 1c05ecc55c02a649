//! Chatty Core - real-time fan-out engine
//!
//! This crate provides the pieces of the Chatty backend that are independent of
//! the HTTP framework:
//! - Registry: live WebSocket connections and their topic subscriptions
//! - Bridge: cross-process broadcast over a shared publish/subscribe backplane
//! - Storage: persistent-storage connection with supervised reconnection
//! - Shutdown: coordinated graceful shutdown via cancellation tokens
//! - Utils: reconnect policy with bounded exponential backoff

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod error;
pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod utils;

pub use bridge::{
    is_valid_topic, Backplane, BackplaneMessage, BridgeConfig, BridgeHealth, BroadcastBridge,
    Delivery, Event, HandleRole, HandleStatus, LinkState, MemoryBackplane, PublisherLink,
    RedisBackplane,
};
pub use error::{BackplaneError, BridgeError, RegistryError, StorageError};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, RegistrationHandle};
pub use shutdown::{shutdown_signal_with_controller, ShutdownController, ShutdownPhase, TaskGuard};
pub use storage::{SqlStorage, SqlStorageOptions, Storage, StorageState, StorageSupervisor};
pub use utils::{reconnect_with_backoff, ReconnectPolicy};
