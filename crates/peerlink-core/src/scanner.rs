//! Bounded peer discovery sessions

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::callbacks::CallbackSink;
use crate::cancel::CancelSignal;
use crate::errors::TransportError;
use crate::transport::{ScanEvent, TransportAdapter};
use crate::types::RoleId;

// ----------------------------------------------------------------------------
// Device Scanner
// ----------------------------------------------------------------------------

/// One discovery session
///
/// Reports each discovered peer and then a single `discovery_finished`.
/// Not restartable: a new scanner is built for every session.
#[derive(Debug)]
pub struct DeviceScanner {
    id: RoleId,
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

impl DeviceScanner {
    /// Start a session on `transport` lasting at most `window`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        id: RoleId,
        transport: &dyn TransportAdapter,
        window: Duration,
        sink: CallbackSink,
    ) -> Result<Self, TransportError> {
        let mut events = transport.scan(window)?;
        let cancel = CancelSignal::new();
        let worker_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            info!("Discovery session {} started ({:?} window)", id, window);
            let mut discovered = 0usize;

            loop {
                let event = tokio::select! {
                    biased;
                    _ = worker_cancel.cancelled() => break,
                    event = events.next() => event,
                };

                if worker_cancel.is_cancelled() {
                    break;
                }

                match event {
                    Some(ScanEvent::Discovered(peer)) => {
                        discovered += 1;
                        debug!("Session {} discovered {}", id, peer);
                        sink.peer_discovered(id, peer);
                    }
                    Some(ScanEvent::Finished) | None => {
                        info!("Discovery session {} finished with {} peers", id, discovered);
                        sink.discovery_finished(id);
                        return;
                    }
                }
            }

            debug!("Discovery session {} cancelled", id);
        });

        Ok(Self { id, cancel, handle })
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Cancel the session; no events are reported afterwards
    pub fn terminate(&self) {
        if self.cancel.cancel() {
            debug!("Stopping discovery session {}", self.id);
        }
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        self.terminate();
    }
}
