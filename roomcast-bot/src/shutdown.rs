//! Shutdown coordination
//!
//! Every unrecoverable condition funnels into one [`ShutdownHandle`]. The
//! first `fire` wins; later calls from other components are ignored, so the
//! teardown sequence in `main` runs exactly once no matter how many
//! subsystems fail together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// Cloneable handle used by any component to request process shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    fired: Arc<AtomicBool>,
    tx: mpsc::Sender<String>,
}

impl ShutdownHandle {
    /// Create a handle and the receiver `main` waits on.
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                fired: Arc::new(AtomicBool::new(false)),
                tx,
            },
            rx,
        )
    }

    /// Request shutdown. Returns true if this call was the one that fired.
    pub fn fire(&self, reason: impl Into<String>) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let reason = reason.into();
        error!("shutdown requested: {}", reason);
        // Receiver gone means main is already tearing down.
        let _ = self.tx.try_send(reason);
        true
    }

    /// Whether shutdown has been requested.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fires_exactly_once() {
        let (handle, mut rx) = ShutdownHandle::new();
        let other = handle.clone();

        assert!(handle.fire("transport failure"));
        assert!(!other.fire("protocol failure"));
        assert!(!handle.fire("again"));
        assert!(handle.is_fired());

        assert_eq!(rx.recv().await.unwrap(), "transport failure");
        assert!(rx.try_recv().is_err());
    }
}
