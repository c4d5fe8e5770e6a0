use super::{
    decode_message, ConnectionId, Decoded, TextReceiver, TextSender, TransportConfig,
    TransportError,
};
use crate::registry::ClientRegistry;
use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type ServerStream = WebSocketStream<TcpStream>;
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Item on a server connection's outbound queue
#[derive(Debug)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Cloneable handle to one accepted server-side connection
///
/// Frames are queued on a bounded channel drained by the connection's writer
/// task, so a slow peer applies backpressure to whoever is sending.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Outgoing>) -> Self {
        Self {
            id,
            peer,
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a text frame for this connection
    pub async fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        if !self.is_open() {
            warn!("Connection {} is closed; message not sent", self.id);
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outgoing::Text(text.into()))
            .await
            .map_err(|_| {
                self.open.store(false, Ordering::SeqCst);
                TransportError::Closed
            })
    }

    /// Close the connection. Only the first call has an effect.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("Closing connection {}", self.id);
        if let Err(mpsc::error::TrySendError::Full(close)) = self.outbound.try_send(Outgoing::Close)
        {
            let outbound = self.outbound.clone();
            tokio::spawn(async move {
                let _ = outbound.send(close).await;
            });
        }
    }
}

#[async_trait]
impl TextSender for ConnectionHandle {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(text).await
    }

    fn is_connected(&self) -> bool {
        self.is_open()
    }

    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

/// Per-mode behavior plugged into the server's connection tasks
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called once the handshake completed and the connection is registered
    async fn on_open(&self, _connection: &ConnectionHandle, _registry: &ClientRegistry) {}

    /// Called for every text frame, in arrival order for each connection
    async fn on_message(&self, connection: &ConnectionHandle, text: String);
}

/// WebSocket listener accepting any number of peers
pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    config: TransportConfig,
}

impl WsServer {
    /// Bind the listener. Failure here is a process-level setup error.
    pub async fn bind(config: &TransportConfig, registry: Arc<ClientRegistry>) -> Result<Self> {
        let addr = config.bind_address();
        debug!("Starting WebSocket server on: {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", addr))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Accept connections until `shutdown` fires, then close every peer.
    pub async fn run(self, handler: Arc<dyn MessageHandler>, shutdown: Shutdown) -> Result<()> {
        info!("WebSocket server listening on {}", self.url());

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    debug!("WebSocket server received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted TCP connection from: {}", peer);
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            self.registry.clone(),
                            handler.clone(),
                            self.config.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept TCP connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }

        self.registry.close_all();
        info!("WebSocket server stopped");
        Ok(())
    }
}

/// Serve one peer: handshake, register, dispatch frames in order, deregister.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ClientRegistry>,
    handler: Arc<dyn MessageHandler>,
    config: TransportConfig,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let ws = match timeout(config.handshake_timeout, accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out", peer);
            return;
        }
    };

    let (sink, mut source) = ws.split();
    let (outbound, queue) = mpsc::channel(config.outbound_queue_depth.max(1));
    let connection = ConnectionHandle::new(ConnectionId::next(), peer, outbound);
    tokio::spawn(write_loop(
        connection.id(),
        sink,
        queue,
        connection.open.clone(),
    ));

    registry.add(connection.clone());
    handler.on_open(&connection, &registry).await;

    while let Some(frame) = source.next().await {
        match frame {
            Ok(message) => match decode_message(message) {
                Decoded::Text(text) => handler.on_message(&connection, text).await,
                Decoded::Control => {}
                Decoded::Close => break,
            },
            Err(e) => {
                debug!("Connection {} read error: {}", connection.id(), e);
                break;
            }
        }
    }

    registry.remove(connection.id());
    connection.close();
    debug!("Connection {} handler finished", connection.id());
}

/// Drain the outbound queue into the socket, batching whatever is queued
/// before each flush.
async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<ServerStream, Message>,
    mut queue: mpsc::Receiver<Outgoing>,
    open: Arc<AtomicBool>,
) {
    'outer: while let Some(first) = queue.recv().await {
        let mut next = Some(first);
        while let Some(outgoing) = next.take() {
            match outgoing {
                Outgoing::Text(text) => {
                    if let Err(e) = sink.feed(Message::Text(text)).await {
                        debug!("Connection {} write failed: {}", id, e);
                        break 'outer;
                    }
                }
                Outgoing::Close => {
                    let _ = sink.close().await;
                    break 'outer;
                }
            }
            next = queue.try_recv().ok();
        }
        if let Err(e) = sink.flush().await {
            debug!("Connection {} flush failed: {}", id, e);
            break;
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!("Connection {} writer finished", id);
}

/// Client side of a WebSocket connection
pub struct WsClient {
    writer: WsClientWriter,
    reader: WsClientReader,
}

/// Sending half of a [`WsClient`]
pub struct WsClientWriter {
    id: ConnectionId,
    sink: SplitSink<ClientStream, Message>,
    open: Arc<AtomicBool>,
}

/// Receiving half of a [`WsClient`]
pub struct WsClientReader {
    id: ConnectionId,
    source: SplitStream<ClientStream>,
    open: Arc<AtomicBool>,
}

impl WsClient {
    /// Connect to `url` (`ws://host:port`) within `connect_timeout`
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        debug!("Connecting to {}", url);
        let (ws, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout(connect_timeout, url.to_string()))??;

        let id = ConnectionId::next();
        let open = Arc::new(AtomicBool::new(true));
        let (sink, source) = ws.split();
        debug!("Connected to {} as connection {}", url, id);

        Ok(Self {
            writer: WsClientWriter {
                id,
                sink,
                open: open.clone(),
            },
            reader: WsClientReader { id, source, open },
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.writer.id
    }

    /// Split into halves that can live on different tasks
    pub fn split(self) -> (WsClientWriter, WsClientReader) {
        (self.writer, self.reader)
    }

    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}

impl WsClientWriter {
    /// Send a close frame. Only the first call has an effect.
    pub async fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing connection {}", self.id);
            if let Err(e) = self.sink.close().await {
                debug!("Connection {} close failed: {}", self.id, e);
            }
        }
    }
}

#[async_trait]
impl TextSender for WsClientWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            warn!("Connection {} is closed; message not sent", self.id);
            return Err(TransportError::Closed);
        }
        self.sink.send(Message::Text(text)).await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::from(e)
        })
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

#[async_trait]
impl TextReceiver for WsClientReader {
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.source.next().await {
                Some(Ok(message)) => match decode_message(message) {
                    Decoded::Text(text) => return Ok(Some(text)),
                    Decoded::Control => continue,
                    Decoded::Close => {
                        debug!("Connection {} closed by peer", self.id);
                        self.open.store(false, Ordering::SeqCst);
                        return Ok(None);
                    }
                },
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => {
                    self.open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl TextSender for WsClient {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.writer.send_text(text).await
    }

    fn is_connected(&self) -> bool {
        self.writer.is_connected()
    }

    fn connection_id(&self) -> ConnectionId {
        self.writer.id
    }
}

#[async_trait]
impl TextReceiver for WsClient {
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        self.reader.recv_text().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoUpper;

    #[async_trait]
    impl MessageHandler for EchoUpper {
        async fn on_message(&self, connection: &ConnectionHandle, text: String) {
            let _ = connection.send(text.to_uppercase()).await;
        }
    }

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let registry = Arc::new(ClientRegistry::new());
        let server = WsServer::bind(&loopback_config(), registry.clone())
            .await
            .unwrap();
        let url = server.url();
        let shutdown = Shutdown::new();
        let server_handle = tokio::spawn(server.run(Arc::new(EchoUpper), shutdown.clone()));

        let mut client = WsClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        client.send_text("hello".to_string()).await.unwrap();
        assert_eq!(client.recv_text().await.unwrap().as_deref(), Some("HELLO"));
        assert_eq!(registry.count(), 1);

        shutdown.trigger();
        server_handle.await.unwrap().unwrap();
        assert_eq!(client.recv_text().await.unwrap(), None);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop a listener to get a port with nothing behind it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsClient::connect(&format!("ws://{}", addr), Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_send_after_close_is_skipped() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(
            ConnectionId::next(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
        );

        handle.send("first").await.unwrap();
        handle.close();
        handle.close();
        assert!(matches!(handle.send("second").await, Err(TransportError::Closed)));

        assert!(matches!(rx.recv().await, Some(Outgoing::Text(t)) if t == "first"));
        assert!(matches!(rx.recv().await, Some(Outgoing::Close)));
        drop(handle);
        assert!(rx.recv().await.is_none());
    }
}
