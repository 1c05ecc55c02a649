//! WebSocket frame types
//!
//! Frames are JSON objects tagged by `type`.

use chatty_core::{ConnectionId, Event};
use serde::{Deserialize, Serialize};

/// Frame sent by a client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving events for these topics
    Subscribe { topics: Vec<String> },
    /// Stop receiving events for these topics
    Unsubscribe { topics: Vec<String> },
    /// Emit an event to every subscriber of `topic`, in every process
    Publish {
        topic: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Attach a user identity to the connection; `null` clears it
    Identify { user_id: Option<String> },
    /// Keepalive
    Ping,
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after the upgrade
    Connected { connection_id: ConnectionId },
    /// Current subscriptions, after a subscribe or unsubscribe
    Subscribed { topics: Vec<String> },
    /// An event on a subscribed topic
    Event {
        topic: String,
        payload: serde_json::Value,
    },
    Error {
        message: String,
        code: Option<String>,
    },
    Pong,
}

impl ServerFrame {
    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}

impl From<&Event> for ServerFrame {
    fn from(event: &Event) -> Self {
        Self::Event {
            topic: event.topic.clone(),
            payload: event.payload.clone(),
        }
    }
}
