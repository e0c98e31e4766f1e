//! Discoverability window timer
//!
//! Armed by an acceptor when it asks for the device to become discoverable.
//! The timer only holds that acceptor's own signals, so it cannot reach an
//! acceptor created later.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::types::RoleId;

/// A one-shot scheduled expiry tied to one acceptor instance
#[derive(Debug)]
pub struct DiscoverabilityTimer {
    expired: CancelSignal,
    handle: JoinHandle<()>,
}

impl DiscoverabilityTimer {
    /// Schedule expiry after `window`
    ///
    /// The timer stands down without firing once `owner_cancel` is set.
    pub fn arm(owner: RoleId, window: Duration, owner_cancel: CancelSignal) -> Self {
        let expired = CancelSignal::new();
        let fire = expired.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = owner_cancel.cancelled() => {
                    debug!("Discoverability timer for acceptor {} cancelled", owner);
                }
                _ = tokio::time::sleep(window) => {
                    debug!("Discoverability window for acceptor {} elapsed", owner);
                    fire.cancel();
                }
            }
        });

        Self { expired, handle }
    }

    /// Resolve once the window has elapsed
    pub async fn expired(&self) {
        self.expired.cancelled().await
    }

    /// Stop the timer without firing
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for DiscoverabilityTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
