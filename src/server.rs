//! Server-side message handlers, one per server mode.
//!
//! - [`EchoHandler`]: chat server; greets new peers and echoes messages
//! - [`ReceiverHandler`]: counts benchmark frames through a [`Dispatcher`]
//! - [`SenderHandler`]: answers `START:N` with a count-based burst

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::driver::run_count_burst;
use crate::metrics::ReportSink;
use crate::protocol::{classify, Frame};
use crate::registry::ClientRegistry;
use crate::transport::{ConnectionHandle, ConnectionId, MessageHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Broadcast to every peer when a new one connects
pub const WELCOME_BROADCAST: &str = "New client connected!";

/// Prefix of the echo reply
pub const ECHO_PREFIX: &str = "Server received: ";

/// Chat server behavior
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_open(&self, connection: &ConnectionHandle, registry: &ClientRegistry) {
        info!("Client {} connected from {}", connection.id(), connection.peer());
        let delivered = registry.broadcast(WELCOME_BROADCAST).await;
        debug!("Welcome broadcast delivered to {} clients", delivered);
    }

    async fn on_message(&self, connection: &ConnectionHandle, text: String) {
        info!("Received from {}: {}", connection.id(), text);
        let _ = connection.send(format!("{}{}", ECHO_PREFIX, text)).await;
    }
}

/// Receiver benchmark server behavior
pub struct ReceiverHandler {
    dispatcher: Arc<Dispatcher>,
}

impl ReceiverHandler {
    /// The dispatcher must also be registered as a registry observer so that
    /// sessions of departed peers are discarded.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MessageHandler for ReceiverHandler {
    async fn on_message(&self, connection: &ConnectionHandle, text: String) {
        if let Dispatch::Application(text) = self.dispatcher.dispatch(connection.id(), &text) {
            info!("Received from {}: {}", connection.id(), text);
        }
    }
}

/// Sender benchmark server behavior
pub struct SenderHandler {
    sink: Arc<dyn ReportSink>,
    bursts: Arc<Mutex<HashSet<ConnectionId>>>,
}

impl SenderHandler {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            bursts: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Connections with a burst in flight
    pub fn active_bursts(&self) -> usize {
        self.bursts.lock().len()
    }

    fn spawn_burst(&self, connection: &ConnectionHandle, count: u64) {
        let id = connection.id();
        if !self.bursts.lock().insert(id) {
            warn!("Connection {}: burst already running; request ignored", id);
            return;
        }

        let mut handle = connection.clone();
        let sink = self.sink.clone();
        let bursts = self.bursts.clone();
        tokio::spawn(async move {
            run_count_burst(&mut handle, count, sink.as_ref()).await;
            bursts.lock().remove(&id);
        });
    }
}

#[async_trait]
impl MessageHandler for SenderHandler {
    async fn on_message(&self, connection: &ConnectionHandle, text: String) {
        match classify(&text) {
            Ok(Frame::Start { count: Some(count) }) => self.spawn_burst(connection, count),
            Ok(Frame::Start { count: None }) => {
                warn!(
                    "Connection {}: START without a message count; nothing to send",
                    connection.id()
                );
            }
            Ok(Frame::Application(text)) => info!("Received from {}: {}", connection.id(), text),
            Ok(frame) => debug!("Connection {}: ignoring {:?}", connection.id(), frame),
            Err(e) => warn!("Connection {}: discarding frame: {}", connection.id(), e),
        }
    }
}
