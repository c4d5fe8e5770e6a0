//! In-process transport pair.
//!
//! Two [`MemoryTransport`] ends are linked by bounded channels and share a
//! single liveness flag: closing either end closes the link for both. The
//! bounded queues give the same backpressure shape as a socket, which keeps
//! sender loops honest when they run against an in-memory peer.

use super::{ConnectionId, TextReceiver, TextSender, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One end of an in-memory text connection
pub struct MemoryTransport {
    id: ConnectionId,
    tx: Option<mpsc::Sender<String>>,
    rx: mpsc::Receiver<String>,
    link_up: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a linked pair with `capacity` frames of buffering each way
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let link_up = Arc::new(AtomicBool::new(true));

        let a = MemoryTransport {
            id: ConnectionId::next(),
            tx: Some(a_tx),
            rx: a_rx,
            link_up: link_up.clone(),
        };
        let b = MemoryTransport {
            id: ConnectionId::next(),
            tx: Some(b_tx),
            rx: b_rx,
            link_up,
        };
        (a, b)
    }

    /// Close the link. Frames already queued stay readable by the peer.
    pub fn close(&mut self) {
        if self.link_up.swap(false, Ordering::SeqCst) {
            debug!("Memory transport {} closed", self.id);
        }
        self.tx = None;
    }

    /// Drain whatever is queued right now without waiting
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[async_trait]
impl TextSender for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.link_up.load(Ordering::SeqCst) {
            warn!("Connection {} is closed; frame not sent", self.id);
            return Err(TransportError::Closed);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(TransportError::Closed);
        };
        tx.send(text).await.map_err(|_| {
            self.link_up.store(false, Ordering::SeqCst);
            TransportError::Closed
        })
    }

    fn is_connected(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

#[async_trait]
impl TextReceiver for MemoryTransport {
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_exchanges_frames() {
        let (mut a, mut b) = MemoryTransport::pair(8);

        a.send_text("ping".to_string()).await.unwrap();
        assert_eq!(b.recv_text().await.unwrap().as_deref(), Some("ping"));

        b.send_text("pong".to_string()).await.unwrap();
        assert_eq!(a.recv_text().await.unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_send_after_close_is_skipped() {
        let (mut a, mut b) = MemoryTransport::pair(8);
        a.send_text("queued".to_string()).await.unwrap();

        b.close();
        assert!(!a.is_connected());
        assert!(matches!(
            a.send_text("late".to_string()).await,
            Err(TransportError::Closed)
        ));

        // The frame queued before the close is still delivered, then EOF.
        a.close();
        assert_eq!(b.recv_text().await.unwrap().as_deref(), Some("queued"));
        assert_eq!(b.recv_text().await.unwrap(), None);
    }
}
