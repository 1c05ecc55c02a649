use crate::bridge::Event;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Process-unique connection identifier
pub type ConnectionId = Uuid;

/// One live real-time client session
///
/// The outbound queue is bounded; when a client cannot keep up, events for it
/// are dropped rather than stalling fan-out for everyone else.
pub struct Connection {
    id: ConnectionId,
    user: RwLock<Option<String>>,
    topics: RwLock<HashSet<String>>,
    outbound: mpsc::Sender<Arc<Event>>,
    /// Cleared by `unregister` under the write lock
    live: RwLock<bool>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Create a connection with a fresh identifier around an outbound queue
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Arc<Event>>) -> Self {
        Self::with_id(Uuid::new_v4(), outbound)
    }

    /// Create a connection with a given identifier
    #[must_use]
    pub fn with_id(id: ConnectionId, outbound: mpsc::Sender<Arc<Event>>) -> Self {
        Self {
            id,
            user: RwLock::new(None),
            topics: RwLock::new(HashSet::new()),
            outbound,
            live: RwLock::new(true),
            connected_at: Utc::now(),
        }
    }

    /// Create a connection together with the receiving end of its queue
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Connection identifier
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identified user, if any
    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// When the connection was created
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether the connection is subscribed to `topic`
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }

    /// Subscribed topics, sorted
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// Whether the connection is still registered
    #[must_use]
    pub fn is_live(&self) -> bool {
        *self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for the client without waiting.
    ///
    /// Returns `false` when the queue is full or the client is gone.
    pub fn send(&self, event: Arc<Event>) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    connection_id = %self.id,
                    topic = %event.topic,
                    "Outbound queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn subscribe(&self, topic: &str) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string())
    }

    pub(crate) fn unsubscribe(&self, topic: &str) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic)
    }

    pub(crate) fn set_user(&self, user: Option<String>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    /// Shared liveness guard held while a callback runs against this connection
    pub(crate) fn liveness(&self) -> RwLockReadGuard<'_, bool> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark dead; blocks until in-flight callbacks holding `liveness` finish
    pub(crate) fn retire(&self) {
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user", &self.user())
            .field("topics", &self.topics())
            .field("live", &self.is_live())
            .finish()
    }
}
