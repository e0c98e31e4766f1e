//! Idempotent cancellation shared between a sub-component and its worker

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation flag that can be awaited
///
/// Clones observe the same flag. Cancelling more than once is a no-op.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag; returns whether this call was the one that set it
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
