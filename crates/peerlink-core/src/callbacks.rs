//! Callback seam between sub-components and the arbiter

use std::sync::Arc;

use crate::channel::EstablishedChannel;
use crate::errors::ArbiterError;
use crate::types::{PeerHandle, RoleId};

/// Events a sub-component reports about itself
///
/// Every call is tagged with the `RoleId` of the instance that produced it
/// and is made from that instance's worker task.
pub trait RoleCallbacks: Send + Sync + 'static {
    fn peer_discovered(&self, origin: RoleId, peer: PeerHandle);

    fn discovery_finished(&self, origin: RoleId);

    fn channel_established(&self, origin: RoleId, channel: EstablishedChannel);

    fn role_failed(&self, origin: RoleId, error: ArbiterError);
}

/// Shared handle to a callback sink
pub type CallbackSink = Arc<dyn RoleCallbacks>;
