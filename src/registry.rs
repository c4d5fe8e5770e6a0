//! # Client Registry
//!
//! Tracks the peers currently connected to the server and notifies
//! observers when they come and go. The registry deals only in connection
//! handles; it has no knowledge of benchmark sessions. Components that keep
//! per-connection state (the dispatcher's session store) subscribe as a
//! [`ConnectionObserver`] and clean up on disconnect.
//!
//! Observers are invoked synchronously, after the registry lock has been
//! released, so an observer may safely call back into the registry.

use crate::transport::{ConnectionHandle, ConnectionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Receives connection lifecycle notifications
pub trait ConnectionObserver: Send + Sync {
    fn on_connect(&self, _id: ConnectionId) {}
    fn on_disconnect(&self, _id: ConnectionId) {}
}

/// Logs connection lifecycle events
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_connect(&self, id: ConnectionId) {
        info!("New client connected: {}", id);
    }

    fn on_disconnect(&self, id: ConnectionId) {
        info!("Client disconnected: {}", id);
    }
}

/// Registry of currently connected peers
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer; observers are fixed once the registry is shared
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Register a connection and notify observers.
    ///
    /// Returns false, without notifying anyone, when the id is already
    /// registered.
    pub fn add(&self, connection: ConnectionHandle) -> bool {
        let id = connection.id();
        {
            let mut clients = self.clients.lock();
            if clients.contains_key(&id) {
                debug!("Connection {} already registered", id);
                return false;
            }
            clients.insert(id, connection);
        }

        for observer in &self.observers {
            observer.on_connect(id);
        }
        true
    }

    /// Deregister a connection and notify observers.
    ///
    /// Removing an unknown id is a no-op and returns `None`.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.clients.lock().remove(&id);
        if removed.is_some() {
            for observer in &self.observers {
                observer.on_disconnect(id);
            }
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.clients.lock().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.clients.lock().get(&id).cloned()
    }

    /// Snapshot of the registered connections, ordered by id
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        let mut connections: Vec<_> = self.clients.lock().values().cloned().collect();
        connections.sort_by_key(|c| c.id());
        connections
    }

    /// Send `text` to every registered connection; returns how many accepted it
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for connection in self.connections() {
            if connection.send(text).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every registered connection
    pub fn close_all(&self) {
        for connection in self.connections() {
            connection.close();
        }
    }
}
