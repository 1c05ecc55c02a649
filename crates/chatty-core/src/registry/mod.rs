//! Connection registry
//!
//! Tracks the real-time connections held by this process and their topic
//! subscriptions. Every per-connection task talks to the same registry, so
//! all operations take `&self` and are safe on a multi-threaded runtime.

mod connection;

pub use connection::{Connection, ConnectionId};

use crate::bridge::Event;
use crate::error::RegistryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, debug_span, trace};

/// Registry of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// The connection stays registered until [`ConnectionRegistry::unregister`]
    /// is called or the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// `DuplicateConnection` if a connection with the same id is registered
    pub fn register(
        self: &Arc<Self>,
        connection: Connection,
    ) -> Result<RegistrationHandle, RegistryError> {
        let id = connection.id();
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                let connection = Arc::new(connection);
                slot.insert(Arc::clone(&connection));
                debug!(connection_id = %id, total = self.connections.len(), "Connection registered");
                Ok(RegistrationHandle {
                    registry: Arc::downgrade(self),
                    connection,
                })
            }
        }
    }

    /// Remove a connection. Idempotent; returns whether it was registered.
    ///
    /// Waits for any `for_each_subscriber` callback currently running against
    /// this connection, so once this returns the connection is never visited
    /// again.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, connection)) => {
                connection.retire();
                debug!(connection_id = %id, total = self.connections.len(), "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Invoke `f` for every connection subscribed to `topic`.
    ///
    /// The set of candidates is taken when the call starts; connections
    /// unregistered before they are reached are skipped. `f` must not
    /// unregister (or drop the handle of) the connection it is visiting.
    pub fn for_each_subscriber<F>(&self, topic: &str, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        let candidates: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_subscribed(topic))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for connection in &candidates {
            let live = connection.liveness();
            if *live {
                f(connection);
            }
        }
    }

    /// Queue an event on every subscribed connection; returns the number queued
    pub fn fan_out(&self, event: &Arc<Event>) -> usize {
        let _span = debug_span!("registry", topic = %event.topic).entered();
        let mut delivered = 0;
        self.for_each_subscriber(&event.topic, |connection| {
            if connection.send(Arc::clone(event)) {
                delivered += 1;
            }
        });
        trace!(delivered, "Event fanned out");
        delivered
    }

    /// Subscribe a connection to a topic; returns `false` if it already was
    ///
    /// # Errors
    ///
    /// `UnknownConnection` if the id is not registered
    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> Result<bool, RegistryError> {
        self.with_connection(id, |connection| connection.subscribe(topic))
    }

    /// Remove a topic subscription; returns `false` if there was none
    ///
    /// # Errors
    ///
    /// `UnknownConnection` if the id is not registered
    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) -> Result<bool, RegistryError> {
        self.with_connection(id, |connection| connection.unsubscribe(topic))
    }

    /// Attach (or clear) the user identity of a connection
    ///
    /// # Errors
    ///
    /// `UnknownConnection` if the id is not registered
    pub fn set_user(&self, id: ConnectionId, user: Option<String>) -> Result<(), RegistryError> {
        self.with_connection(id, |connection| connection.set_user(user))
    }

    /// Look up a connection
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn with_connection<T>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&Connection) -> T,
    ) -> Result<T, RegistryError> {
        let connection = self
            .get(id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        Ok(f(&connection))
    }
}

/// Keeps a connection registered; dropping it unregisters the connection
#[derive(Debug)]
pub struct RegistrationHandle {
    registry: Weak<ConnectionRegistry>,
    connection: Arc<Connection>,
}

impl RegistrationHandle {
    /// Identifier of the registered connection
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// The registered connection
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.connection.id());
        }
    }
}
