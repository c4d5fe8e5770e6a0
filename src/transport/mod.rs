//! # Transport Layer
//!
//! Connection identifiers, transport errors and the [`TextSender`] /
//! [`TextReceiver`] traits the benchmark logic is written against. The
//! WebSocket implementation lives in [`websocket`]; [`memory`] provides a
//! linked in-process pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::warn;

pub mod memory;
pub mod websocket;

pub use memory::MemoryTransport;
pub use websocket::{
    ConnectionHandle, MessageHandler, WsClient, WsClientReader, WsClientWriter, WsServer,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection identifier for tracking peer connections
///
/// Identifiers come from a process-wide counter and are never reused, so a
/// late event for a closed connection can never be mistaken for a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a fresh identifier
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is known to be closed; nothing was sent
    #[error("connection closed")]
    Closed,

    #[error("timed out after {0:?} connecting to {1}")]
    ConnectTimeout(Duration, String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl TransportError {
    /// Whether the error means the peer is gone rather than a local fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::WebSocket(e) => matches!(
                e,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Io(_)
                    | tungstenite::Error::Protocol(_)
            ),
            TransportError::ConnectTimeout(..) => false,
        }
    }
}

/// Transport configuration for the WebSocket endpoint
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on establishing a client connection
    pub connect_timeout: Duration,
    /// Upper bound on the server side of the opening handshake
    pub handshake_timeout: Duration,
    /// Depth of each connection's outbound queue on the server
    pub outbound_queue_depth: usize,
}

impl TransportConfig {
    /// `ws://host:port` for this configuration
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: crate::defaults::HOST.to_string(),
            port: crate::defaults::PORT,
            connect_timeout: crate::defaults::CONNECT_TIMEOUT,
            handshake_timeout: Duration::from_secs(5),
            outbound_queue_depth: 1024,
        }
    }
}

/// Sending half of a text-frame connection
#[async_trait]
pub trait TextSender: Send {
    /// Send one text frame. Fails with [`TransportError::Closed`] without
    /// touching the wire when the connection is already known closed.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Whether the connection is still believed open
    fn is_connected(&self) -> bool;

    fn connection_id(&self) -> ConnectionId;
}

/// Receiving half of a text-frame connection
#[async_trait]
pub trait TextReceiver: Send {
    /// Next text frame, or `None` once the peer has closed the connection
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError>;
}

/// Result of decoding one WebSocket message at the transport boundary
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Text(String),
    /// Ping/pong or raw frames; nothing for the application
    Control,
    Close,
}

/// Decode a WebSocket message into the UTF-8 text contract.
///
/// Text frames are valid UTF-8 by construction. Binary frames are accepted
/// when they hold valid UTF-8; otherwise they are converted lossily and a
/// warning is logged, so the content is still passed on.
pub fn decode_message(message: Message) -> Decoded {
    match message {
        Message::Text(text) => Decoded::Text(text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Decoded::Text(text),
            Err(e) => {
                warn!(
                    "Binary frame is not valid UTF-8 ({}); passing it on lossily",
                    e.utf8_error()
                );
                Decoded::Text(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        },
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Decoded::Control,
        Message::Close(_) => Decoded::Close,
    }
}
