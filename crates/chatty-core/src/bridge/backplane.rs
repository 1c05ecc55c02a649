use crate::error::BackplaneError;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;

/// Raw message received from a subscriber handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneMessage {
    /// Backplane channel the message arrived on
    pub channel: String,
    /// Encoded event
    pub payload: Vec<u8>,
}

/// Stream of messages from a subscriber connection; ends when the connection drops
pub type MessageStream = Pin<Box<dyn Stream<Item = BackplaneMessage> + Send>>;

/// A publish/subscribe service reachable by address.
///
/// Each call to `connect_publisher` or `connect_subscriber` must open a new,
/// independent connection.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Address for logs and health reports (credentials removed)
    fn address(&self) -> String;

    /// Open a connection for publishing
    async fn connect_publisher(&self) -> Result<Box<dyn PublisherLink>, BackplaneError>;

    /// Open a connection subscribed to every channel matching `pattern`
    async fn connect_subscriber(&self, pattern: &str) -> Result<MessageStream, BackplaneError>;
}

/// An open publishing connection, shared by concurrent publishers
#[async_trait]
pub trait PublisherLink: Send + Sync {
    /// Publish an encoded event on a channel
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError>;

    /// Round trip proving the connection is still usable
    async fn ping(&self) -> Result<(), BackplaneError>;
}

/// Role of a backplane handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleRole {
    /// Outbound events
    Publisher,
    /// Inbound events
    Subscriber,
}

impl std::fmt::Display for HandleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publisher => write!(f, "publisher"),
            Self::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Connection state of a backplane handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Connection attempt in progress
    Connecting,
    /// Usable
    Connected,
    /// Lost; a reconnect may be pending
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Observable state of one backplane handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleStatus {
    /// Publisher or subscriber
    pub role: HandleRole,
    /// Target address
    pub address: String,
    /// Current connection state
    pub state: LinkState,
    /// Reconnect attempts since the handle was last connected
    pub reconnect_attempts: u32,
}

impl HandleStatus {
    pub(crate) fn connected(role: HandleRole, address: String) -> Self {
        Self {
            role,
            address,
            state: LinkState::Connected,
            reconnect_attempts: 0,
        }
    }

    /// Whether the handle is usable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

/// Health of the bridge as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeHealth {
    /// Publisher handle
    pub publisher: HandleStatus,
    /// Subscriber handle
    pub subscriber: HandleStatus,
    /// Set when a reconnect cycle was exhausted; cleared once both handles are back
    pub degraded: bool,
}

impl BridgeHealth {
    /// Mutable access to the status of one handle
    pub(crate) fn handle_mut(&mut self, role: HandleRole) -> &mut HandleStatus {
        match role {
            HandleRole::Publisher => &mut self.publisher,
            HandleRole::Subscriber => &mut self.subscriber,
        }
    }

    /// Both handles are connected
    #[must_use]
    pub fn is_fully_connected(&self) -> bool {
        self.publisher.is_connected() && self.subscriber.is_connected()
    }
}
