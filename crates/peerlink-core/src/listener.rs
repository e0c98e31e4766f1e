//! Collaborators implemented by the application

use crate::channel::EstablishedChannel;
use crate::errors::ArbiterError;
use crate::types::PeerHandle;

/// Receives the outcome of arbitration
///
/// Methods are called from the worker task of whichever sub-component
/// produced the event, never while the arbiter's state lock is held, so an
/// implementation may call back into the arbiter. Role changes on other
/// threads wait until the method returns, so it must not block on them.
pub trait ChannelListener: Send + Sync {
    /// A channel was established; ownership moves to the listener
    fn on_channel_established(&self, channel: EstablishedChannel);

    /// An accept or connect attempt ended without a channel, or a discovery
    /// session could not start
    fn on_connection_failure(&self, _error: &ArbiterError) {}

    /// A peer was added to the discovery set
    fn on_peer_discovered(&self, _peer: &PeerHandle) {}

    /// The discovery session ended on its own
    fn on_discovery_finished(&self) {}
}

/// Shows discovered peers to a user
///
/// The user's choice is returned through `RoleArbiter::choose_peer`.
/// `present` is called again with the whole set every time it grows, so an
/// implementation is free to tear down and rebuild its view.
pub trait DeviceSelectionPresenter: Send + Sync {
    fn present(&self, peers: &[PeerHandle]);

    fn dismiss(&self);
}
