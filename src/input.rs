//! Keyboard input for the chat modes.
//!
//! Reading stdin blocks, so a dedicated OS thread reads lines and pushes the
//! non-blank ones, unchanged, onto an unbounded queue. The async side polls
//! the queue with a short timeout so it keeps observing the stop signal and
//! the state of the connection between keystrokes.

use crate::shutdown::Shutdown;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result of one poll of the input queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Nothing arrived within the poll timeout
    Idle,
    /// The reader thread is gone (EOF, read error or shutdown)
    Closed,
}

/// Line producer backed by a blocking reader thread
pub struct KeyboardInput {
    lines: mpsc::UnboundedReceiver<String>,
}

impl KeyboardInput {
    /// Read lines from stdin
    pub fn spawn(shutdown: Shutdown) -> Self {
        Self::spawn_from(BufReader::new(std::io::stdin()), shutdown)
    }

    /// Read lines from any blocking reader
    pub fn spawn_from<R>(reader: R, shutdown: Shutdown) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let spawned = std::thread::Builder::new()
            .name("keyboard-input".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    if shutdown.is_triggered() {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("Failed to read input: {}", e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("Keyboard input thread exiting");
            });

        if let Err(e) = spawned {
            warn!("Failed to start keyboard input thread: {}", e);
        }

        Self { lines: rx }
    }

    /// Wait up to `poll` for the next line
    pub async fn next_line(&mut self, poll: Duration) -> InputEvent {
        match tokio::time::timeout(poll, self.lines.recv()).await {
            Ok(Some(line)) => InputEvent::Line(line),
            Ok(None) => InputEvent::Closed,
            Err(_) => InputEvent::Idle,
        }
    }
}
