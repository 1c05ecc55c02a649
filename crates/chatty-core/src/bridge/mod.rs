//! Broadcast bridge - cross-process fan-out over a publish/subscribe backplane.
//!
//! Every event emitted on one server process is published to a shared
//! backplane and delivered back to every process (the origin included) through
//! its subscriber handle. Publisher and subscriber are always separate
//! connections so a slow subscriber cannot hold up outbound publishes.
//!
//! Delivery is at-most-once: events published while a subscriber handle is
//! reconnecting are not replayed.

/// Backplane abstraction and handle state types.
pub mod backplane;
/// Bridge implementation (publish, delivery callback, reconnection).
pub mod broadcast;
/// Event envelope and topic naming.
pub mod event;
/// In-process backplane for single-node deployments and tests.
pub mod memory;
/// Redis-backed backplane.
pub mod redis;

pub use backplane::{
    Backplane, BackplaneMessage, BridgeHealth, HandleRole, HandleStatus, LinkState, MessageStream,
    PublisherLink,
};
pub use broadcast::{BridgeConfig, BroadcastBridge, Delivery, EventCallback};
pub use event::{is_valid_topic, Event, DEFAULT_CHANNEL_PREFIX};
pub use memory::MemoryBackplane;
pub use self::redis::RedisBackplane;
