//! Contract consumed from the underlying wireless transport
//!
//! The core never talks to a radio directly. A `TransportAdapter` supplies
//! discovery, listen/accept and connect primitives; the sub-components drive
//! them from their own worker tasks.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::channel::ByteStream;
use crate::errors::TransportError;
use crate::types::{PeerAddress, PeerHandle, ServiceId};

/// One item of a discovery session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A peer was observed
    Discovered(PeerHandle),
    /// The scan window elapsed; nothing follows
    Finished,
}

/// A stream accepted on a listening endpoint
pub struct Accepted {
    pub stream: Box<dyn ByteStream>,
    pub remote: Option<PeerAddress>,
}

impl Accepted {
    pub fn new(stream: Box<dyn ByteStream>, remote: Option<PeerAddress>) -> Self {
        Self { stream, remote }
    }
}

/// A bound listening endpoint
///
/// Dropping the endpoint closes it; a pending `accept` on a dropped endpoint
/// never completes.
#[async_trait]
pub trait ListeningEndpoint: Send {
    /// Wait for the next inbound connection
    async fn accept(&mut self) -> Result<Accepted, TransportError>;
}

/// Discovery, listen and connect primitives of a transport
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Bind a listening endpoint under `service`
    fn listen(&self, service: &ServiceId) -> Result<Box<dyn ListeningEndpoint>, TransportError>;

    /// Open a connection to `peer` under `service`
    async fn connect(
        &self,
        peer: &PeerHandle,
        service: &ServiceId,
    ) -> Result<Box<dyn ByteStream>, TransportError>;

    /// Start a bounded discovery session
    ///
    /// The stream yields `Discovered` events and then a single `Finished`.
    fn scan(&self, window: Duration) -> Result<BoxStream<'static, ScanEvent>, TransportError>;

    /// Ask for the local device to be discoverable for `window`
    async fn ensure_discoverable(&self, window: Duration) -> Result<(), TransportError>;

    /// Whether the local device is discoverable right now
    async fn is_discoverable(&self) -> bool;
}
