//! Inbound connection acceptor
//!
//! Binds a listening endpoint under the service identifier and runs the
//! accept loop on a dedicated task. Before every accept the loop makes sure
//! the device is discoverable; the first time it has to ask, it arms a
//! `DiscoverabilityTimer` that ends the acceptor when the window runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackSink;
use crate::cancel::CancelSignal;
use crate::channel::{Direction, EstablishedChannel};
use crate::config::ArbiterConfig;
use crate::errors::{ArbiterError, TransportError};
use crate::timer::DiscoverabilityTimer;
use crate::transport::{Accepted, ListeningEndpoint, TransportAdapter};
use crate::types::{RoleId, ServiceId};

// ----------------------------------------------------------------------------
// Connection Acceptor
// ----------------------------------------------------------------------------

/// Handle to a running accept loop
#[derive(Debug)]
pub struct ConnectionAcceptor {
    id: RoleId,
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

impl ConnectionAcceptor {
    /// Bind and start accepting
    ///
    /// A bind failure is returned before any task is spawned. Must be called
    /// from within a tokio runtime.
    pub fn start(
        id: RoleId,
        transport: Arc<dyn TransportAdapter>,
        config: &ArbiterConfig,
        sink: CallbackSink,
    ) -> Result<Self, ArbiterError> {
        let endpoint = transport.listen(&config.service_id).map_err(|e| {
            error!("Error while creating listening endpoint: {}", e);
            ArbiterError::Bind(e)
        })?;

        let cancel = CancelSignal::new();
        let worker = AcceptLoop {
            id,
            service: config.service_id,
            window: config.discoverability_window,
            transport,
            endpoint,
            cancel: cancel.clone(),
            sink,
            timer: None,
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self { id, cancel, handle })
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Close the listening endpoint and end the loop; idempotent
    pub fn terminate(&self) {
        if self.cancel.cancel() {
            debug!("Stopping accepting task {}", self.id);
        }
    }

    /// Whether the accept loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ConnectionAcceptor {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ----------------------------------------------------------------------------
// Accept Loop
// ----------------------------------------------------------------------------

enum Step {
    Accepted(Result<Accepted, TransportError>),
    WindowElapsed,
    Stopped,
}

struct AcceptLoop {
    id: RoleId,
    service: ServiceId,
    window: Duration,
    transport: Arc<dyn TransportAdapter>,
    endpoint: Box<dyn ListeningEndpoint>,
    cancel: CancelSignal,
    sink: CallbackSink,
    timer: Option<DiscoverabilityTimer>,
}

impl AcceptLoop {
    async fn run(mut self) {
        info!("Accepting task {} started under {}", self.id, self.service);

        // A delivered channel retires this acceptor, which sets `cancel`, so
        // later iterations are never reached in normal use.
        while !self.cancel.is_cancelled() {
            self.ensure_discoverability().await;

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Stopped,
                _ = window_elapsed(self.timer.as_ref()) => Step::WindowElapsed,
                result = self.endpoint.accept() => Step::Accepted(result),
            };

            if self.cancel.is_cancelled() {
                break;
            }

            match step {
                Step::Stopped => break,
                Step::WindowElapsed => {
                    info!(
                        "Discoverability window elapsed, accepting task {} ending",
                        self.id
                    );
                    self.cancel.cancel();
                    self.sink.role_failed(
                        self.id,
                        ArbiterError::DiscoverabilityExpired {
                            window: self.window,
                        },
                    );
                    break;
                }
                Step::Accepted(Ok(accepted)) => {
                    info!(
                        "Accepted inbound connection from {}",
                        accepted
                            .remote
                            .as_ref()
                            .map(|a| a.as_str())
                            .unwrap_or("unknown peer")
                    );
                    let channel = EstablishedChannel::new(
                        accepted.stream,
                        Direction::Inbound,
                        None,
                        accepted.remote,
                    );
                    self.sink.channel_established(self.id, channel);
                }
                Step::Accepted(Err(e)) => {
                    error!("Error while accepting: {}", e);
                    self.cancel.cancel();
                    self.sink.role_failed(self.id, ArbiterError::Accept(e));
                    break;
                }
            }
        }

        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        info!("Accepting task {} ended", self.id);
    }

    async fn ensure_discoverability(&mut self) {
        if self.transport.is_discoverable().await {
            return;
        }

        debug!("Requesting discoverability for {:?}", self.window);
        if let Err(e) = self.transport.ensure_discoverable(self.window).await {
            warn!("Discoverability request failed: {}", e);
        }

        if self.timer.is_none() {
            self.timer = Some(DiscoverabilityTimer::arm(
                self.id,
                self.window,
                self.cancel.clone(),
            ));
        }
    }
}

async fn window_elapsed(timer: Option<&DiscoverabilityTimer>) {
    match timer {
        Some(timer) => timer.expired().await,
        None => std::future::pending().await,
    }
}
