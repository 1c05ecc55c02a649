//! Error types for chatty-core

use crate::bridge::HandleRole;
use thiserror::Error;
use uuid::Uuid;

/// Connection registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with the same identifier is already registered
    #[error("connection {0} is already registered")]
    DuplicateConnection(Uuid),

    /// No connection with this identifier is registered
    #[error("connection {0} is not registered")]
    UnknownConnection(Uuid),
}

/// Errors raised by a backplane client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackplaneError {
    /// Could not establish a connection
    #[error("backplane connection failed: {0}")]
    Connection(String),

    /// The connection is up but a command was rejected
    #[error("backplane command failed: {0}")]
    Command(String),

    /// The connection was lost
    #[error("backplane connection lost")]
    Disconnected,

    /// A command got no reply in time; the connection is treated as lost
    #[error("backplane command timed out")]
    Timeout,
}

impl BackplaneError {
    /// Whether this error means the underlying connection is gone
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Disconnected | Self::Timeout)
    }
}

/// Broadcast bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A backplane handle could not be opened at startup
    #[error("backplane unavailable for {role} handle: {reason}")]
    BackplaneUnavailable {
        /// Which handle failed
        role: HandleRole,
        /// Underlying cause
        reason: String,
    },

    /// Publishing an event failed; the caller decides whether to retry
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed {
        /// Topic of the rejected event
        topic: String,
        /// Underlying cause
        reason: String,
    },

    /// Topic name is not acceptable
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),

    /// Event could not be serialized
    #[error("event encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persistent storage errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Could not connect
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// Health probe failed on an open connection
    #[error("storage ping failed: {0}")]
    Ping(String),

    /// No connection has been established
    #[error("storage is not connected")]
    NotConnected,
}
