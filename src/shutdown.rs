//! Process-wide stop signal and single-shot close guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Cloneable stop signal shared by the accept loop, chat loops and the
/// keyboard input thread
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns true for the first caller only.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.triggered.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has fired
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a trigger in between is
            // not lost.
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Trigger on Ctrl+C
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Interrupt received, shutting down");
                        shutdown.trigger();
                    }
                    Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
                },
                _ = shutdown.wait() => {}
            }
        })
    }
}

/// Lets exactly one of several racing exit paths run the close step
///
/// Clones share the same flag, so a reader task that sees the peer go away
/// and the local exit path can each hold one.
#[derive(Debug, Clone, Default)]
pub struct CloseOnce {
    closed: Arc<AtomicBool>,
}

impl CloseOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller, false afterwards
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
