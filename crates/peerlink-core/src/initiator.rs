//! Single outbound connection attempt

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callbacks::CallbackSink;
use crate::cancel::CancelSignal;
use crate::channel::{Direction, EstablishedChannel};
use crate::errors::ArbiterError;
use crate::transport::TransportAdapter;
use crate::types::{PeerHandle, RoleId, ServiceId};

// ----------------------------------------------------------------------------
// Connection Initiator
// ----------------------------------------------------------------------------

/// One connect call to one peer, run off the caller's thread
///
/// Produces exactly one terminal callback unless terminated first. There is
/// no retry and no timeout beyond the transport's own.
#[derive(Debug)]
pub struct ConnectionInitiator {
    id: RoleId,
    peer: PeerHandle,
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

impl ConnectionInitiator {
    /// Start connecting to `peer`; must be called from within a tokio runtime
    pub fn start(
        id: RoleId,
        transport: Arc<dyn TransportAdapter>,
        peer: PeerHandle,
        service: ServiceId,
        sink: CallbackSink,
    ) -> Self {
        let cancel = CancelSignal::new();
        let worker_cancel = cancel.clone();
        let target = peer.clone();

        let handle = tokio::spawn(async move {
            info!("Connecting to {} ({})", target.display_name(), target.address);

            let result = tokio::select! {
                biased;
                _ = worker_cancel.cancelled() => {
                    debug!("Connection attempt {} aborted", id);
                    return;
                }
                result = transport.connect(&target, &service) => result,
            };

            if worker_cancel.is_cancelled() {
                debug!("Connection attempt {} finished after abort, discarding", id);
                return;
            }

            match result {
                Ok(stream) => {
                    info!("Connected to {}", target.display_name());
                    let channel = EstablishedChannel::new(
                        stream,
                        Direction::Outbound,
                        target.signal_strength,
                        Some(target.address.clone()),
                    );
                    sink.channel_established(id, channel);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", target.display_name(), e);
                    sink.role_failed(id, ArbiterError::Connect(e));
                }
            }
        });

        Self {
            id,
            peer,
            cancel,
            handle,
        }
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Abort the attempt if still outstanding; idempotent
    pub fn terminate(&self) {
        if self.cancel.cancel() {
            debug!("Stopping connection attempt {} to {}", self.id, self.peer.address);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ConnectionInitiator {
    fn drop(&mut self) {
        self.terminate();
    }
}
