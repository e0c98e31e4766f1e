//! Role arbitration
//!
//! The `RoleArbiter` is the only surface the application drives. It owns at
//! most one live sub-component (scanner, acceptor or initiator) inside a
//! single `ActiveRole` value, so two roles can never be active together.
//!
//! Two locks guard the arbiter. `state` covers the role, the discovery set
//! and the registered collaborators and is never held while a collaborator
//! runs. `notify` is reentrant and is held by every public operation and by
//! every callback from the liveness check through the collaborator call, so
//! once an operation retires a role nothing that role raised can still reach
//! the listener or presenter. Lock order is `notify` then `state`.
//!
//! Callbacks carry the `RoleId` of the instance that raised them and are
//! dropped unless that instance is still the live one.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::acceptor::ConnectionAcceptor;
use crate::callbacks::{CallbackSink, RoleCallbacks};
use crate::channel::EstablishedChannel;
use crate::config::ArbiterConfig;
use crate::errors::{ArbiterError, ArbiterResult};
use crate::initiator::ConnectionInitiator;
use crate::listener::{ChannelListener, DeviceSelectionPresenter};
use crate::scanner::DeviceScanner;
use crate::transport::TransportAdapter;
use crate::types::{DiscoverySet, PeerHandle, Role, RoleId};

// ----------------------------------------------------------------------------
// Active Role
// ----------------------------------------------------------------------------

/// The one live sub-component, if any
#[derive(Debug, Default)]
enum ActiveRole {
    #[default]
    Idle,
    Scanning(DeviceScanner),
    Accepting(ConnectionAcceptor),
    Connecting(ConnectionInitiator),
}

impl ActiveRole {
    fn role(&self) -> Role {
        match self {
            ActiveRole::Idle => Role::Idle,
            ActiveRole::Scanning(_) => Role::Scanning,
            ActiveRole::Accepting(_) => Role::Accepting,
            ActiveRole::Connecting(_) => Role::Connecting,
        }
    }

    fn id(&self) -> Option<RoleId> {
        match self {
            ActiveRole::Idle => None,
            ActiveRole::Scanning(scanner) => Some(scanner.id()),
            ActiveRole::Accepting(acceptor) => Some(acceptor.id()),
            ActiveRole::Connecting(initiator) => Some(initiator.id()),
        }
    }

    fn is_live(&self, origin: RoleId) -> bool {
        self.id() == Some(origin)
    }

    fn is_live_scanner(&self, origin: RoleId) -> bool {
        matches!(self, ActiveRole::Scanning(scanner) if scanner.id() == origin)
    }

    fn terminate(&self) {
        match self {
            ActiveRole::Idle => {}
            ActiveRole::Scanning(scanner) => scanner.terminate(),
            ActiveRole::Accepting(acceptor) => acceptor.terminate(),
            ActiveRole::Connecting(initiator) => initiator.terminate(),
        }
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ArbiterState {
    active: ActiveRole,
    discovered: DiscoverySet,
    listener: Option<Arc<dyn ChannelListener>>,
    presenter: Option<Arc<dyn DeviceSelectionPresenter>>,
}

impl ArbiterState {
    /// Cancel whatever is running and return to idle
    ///
    /// Returns the role that was retired.
    fn retire_active(&mut self) -> Role {
        let previous = std::mem::take(&mut self.active);
        let role = previous.role();
        if role != Role::Idle {
            debug!("Retiring {} role", role);
        }
        previous.terminate();
        role
    }

    /// Presenter to dismiss when `retired` was a discovery session
    fn presenter_after(&self, retired: Role) -> Option<Arc<dyn DeviceSelectionPresenter>> {
        (retired == Role::Scanning)
            .then(|| self.presenter.clone())
            .flatten()
    }
}

struct ArbiterInner {
    transport: Arc<dyn TransportAdapter>,
    config: ArbiterConfig,
    runtime: Handle,
    notify: ReentrantMutex<()>,
    state: Mutex<ArbiterState>,
}

// ----------------------------------------------------------------------------
// Role Arbiter
// ----------------------------------------------------------------------------

/// Coordinates scanning, accepting and connecting so exactly one runs
///
/// Cheap to clone; clones share the same state. Dropping the last clone
/// terminates the live sub-component.
#[derive(Clone)]
pub struct RoleArbiter {
    inner: Arc<ArbiterInner>,
}

impl RoleArbiter {
    /// Create an arbiter whose sub-components run on `runtime`
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        config: ArbiterConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                transport,
                config,
                runtime,
                notify: ReentrantMutex::new(()),
                state: Mutex::new(ArbiterState::default()),
            }),
        }
    }

    /// Create an arbiter on the runtime of the calling context
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_current_runtime(
        transport: Arc<dyn TransportAdapter>,
        config: ArbiterConfig,
    ) -> Self {
        Self::new(transport, config, Handle::current())
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.inner.config
    }

    /// The activity currently running
    pub fn role(&self) -> Role {
        self.inner.state.lock().active.role()
    }

    /// Snapshot of the current discovery set
    pub fn discovered_peers(&self) -> Vec<PeerHandle> {
        self.inner.state.lock().discovered.snapshot()
    }

    /// Replace the listener; applies to later handoffs only
    pub fn set_channel_listener(&self, listener: Option<Arc<dyn ChannelListener>>) {
        let _notify = self.inner.notify.lock();
        self.inner.state.lock().listener = listener;
    }

    /// Replace the presenter used for discovery results
    pub fn set_presenter(&self, presenter: Option<Arc<dyn DeviceSelectionPresenter>>) {
        let _notify = self.inner.notify.lock();
        self.inner.state.lock().presenter = presenter;
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Start a discovery session unless one is already running
    ///
    /// A session that cannot start is reported as
    /// [`ArbiterError::ScanUnavailable`] and the arbiter stays idle.
    pub fn start_discovery(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if matches!(state.active, ActiveRole::Scanning(_)) {
            debug!("Discovery already running");
            return;
        }

        state.retire_active();
        state.discovered.clear();
        let presenter = state.presenter.clone();

        let id = RoleId::next();
        let started = {
            let _runtime = self.inner.runtime.enter();
            DeviceScanner::start(
                id,
                self.inner.transport.as_ref(),
                self.inner.config.scan_window,
                self.callbacks(),
            )
        };

        let failure = match started {
            Ok(scanner) => {
                info!("Finding devices (session {})", id);
                state.active = ActiveRole::Scanning(scanner);
                None
            }
            Err(e) => {
                warn!("Discovery could not start: {}", e);
                Some((ArbiterError::ScanUnavailable(e), state.listener.clone()))
            }
        };
        drop(state);

        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
        if let Some((error, Some(listener))) = failure {
            listener.on_connection_failure(&error);
        }
    }

    /// Cancel the discovery session, if any; idempotent
    pub fn stop_discovery(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if !matches!(state.active, ActiveRole::Scanning(_)) {
            return;
        }
        state.retire_active();
        state.discovered.clear();
        let presenter = state.presenter.clone();
        drop(state);

        info!("Stopped finding devices");
        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
    }

    /// Connect to the peer at `index` of the discovery set
    ///
    /// Selecting the peer, clearing the set, retiring the scanner and starting
    /// the attempt happen under one lock, so no discovery event lands in
    /// between. The presenter is dismissed afterwards.
    pub fn choose_peer(&self, index: usize) -> ArbiterResult<PeerHandle> {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        let peer = state
            .discovered
            .get(index)
            .cloned()
            .ok_or(ArbiterError::NoSuchPeer {
                index,
                available: state.discovered.len(),
            })?;

        debug!("Peer {} chosen", peer);
        let presenter = state.presenter.clone();
        self.start_connect_locked(&mut state, peer.clone());
        drop(state);

        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
        Ok(peer)
    }

    // ------------------------------------------------------------------------
    // Accepting
    // ------------------------------------------------------------------------

    /// Start accepting inbound connections unless already accepting
    pub fn start_accepting(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if matches!(state.active, ActiveRole::Accepting(_)) {
            debug!("Already accepting connections");
            return;
        }

        let retired = state.retire_active();
        state.discovered.clear();
        let presenter = state.presenter_after(retired);

        let id = RoleId::next();
        let started = {
            let _runtime = self.inner.runtime.enter();
            ConnectionAcceptor::start(
                id,
                Arc::clone(&self.inner.transport),
                &self.inner.config,
                self.callbacks(),
            )
        };

        let failure = match started {
            Ok(acceptor) => {
                info!("Accepting connections (task {})", id);
                state.active = ActiveRole::Accepting(acceptor);
                None
            }
            Err(e) => Some((e, state.listener.clone())),
        };
        drop(state);

        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
        if let Some((error, Some(listener))) = failure {
            listener.on_connection_failure(&error);
        }
    }

    /// Stop accepting, if accepting; idempotent
    pub fn stop_accepting(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if matches!(state.active, ActiveRole::Accepting(_)) {
            state.retire_active();
            info!("Stopped accepting connections");
        }
    }

    // ------------------------------------------------------------------------
    // Connecting
    // ------------------------------------------------------------------------

    /// Start an outbound attempt to `peer`; the first attempt wins
    pub fn attempt_connect(&self, peer: PeerHandle) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if let ActiveRole::Connecting(current) = &state.active {
            debug!(
                "Connection to {} already in progress, ignoring {}",
                current.peer().address,
                peer.address
            );
            return;
        }

        let retired = self.start_connect_locked(&mut state, peer);
        let presenter = state.presenter_after(retired);
        drop(state);

        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
    }

    /// Abort the outbound attempt, if any; idempotent
    pub fn stop_connecting(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        if matches!(state.active, ActiveRole::Connecting(_)) {
            state.retire_active();
            info!("Stopped attempting connection");
        }
    }

    /// Stop whatever is running and clear the discovery set
    pub fn shutdown(&self) {
        let _notify = self.inner.notify.lock();
        let mut state = self.inner.state.lock();
        let retired = state.retire_active();
        state.discovered.clear();
        let presenter = state.presenter_after(retired);
        drop(state);

        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
    }

    /// Retire the live role and start an initiator for `peer`
    ///
    /// Returns the role that was retired.
    fn start_connect_locked(&self, state: &mut ArbiterState, peer: PeerHandle) -> Role {
        let retired = state.retire_active();
        state.discovered.clear();

        let id = RoleId::next();
        let initiator = {
            let _runtime = self.inner.runtime.enter();
            ConnectionInitiator::start(
                id,
                Arc::clone(&self.inner.transport),
                peer,
                self.inner.config.service_id,
                self.callbacks(),
            )
        };
        state.active = ActiveRole::Connecting(initiator);
        retired
    }

    fn callbacks(&self) -> CallbackSink {
        Arc::new(ArbiterCallbacks {
            inner: Arc::downgrade(&self.inner),
        })
    }
}

// ----------------------------------------------------------------------------
// Callback Handling
// ----------------------------------------------------------------------------

/// Routes sub-component callbacks back into the arbiter
///
/// Holds a weak reference so a worker that outlives the arbiter just drops
/// its events.
struct ArbiterCallbacks {
    inner: Weak<ArbiterInner>,
}

impl RoleCallbacks for ArbiterCallbacks {
    fn peer_discovered(&self, origin: RoleId, peer: PeerHandle) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_peer_discovered(origin, peer);
        }
    }

    fn discovery_finished(&self, origin: RoleId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_discovery_finished(origin);
        }
    }

    fn channel_established(&self, origin: RoleId, channel: EstablishedChannel) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_channel(origin, channel);
        }
    }

    fn role_failed(&self, origin: RoleId, error: ArbiterError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_failure(origin, error);
        }
    }
}

impl ArbiterInner {
    fn handle_peer_discovered(&self, origin: RoleId, peer: PeerHandle) {
        let _notify = self.notify.lock();
        let mut state = self.state.lock();
        // Also covers a connect having started while the scanner was mid-event.
        if !state.active.is_live_scanner(origin) {
            debug!("Ignoring peer from superseded discovery session {}", origin);
            return;
        }

        state.discovered.push(peer.clone());
        let peers = state.discovered.snapshot();
        let presenter = state.presenter.clone();
        let listener = state.listener.clone();
        drop(state);

        if let Some(presenter) = presenter {
            presenter.present(&peers);
        }
        if let Some(listener) = listener {
            listener.on_peer_discovered(&peer);
        }
    }

    fn handle_discovery_finished(&self, origin: RoleId) {
        let _notify = self.notify.lock();
        let mut state = self.state.lock();
        if !state.active.is_live_scanner(origin) {
            debug!("Ignoring finish of superseded discovery session {}", origin);
            return;
        }

        state.retire_active();
        state.discovered.clear();
        let presenter = state.presenter.clone();
        let listener = state.listener.clone();
        drop(state);

        debug!("Finished discovery");
        if let Some(presenter) = presenter {
            presenter.dismiss();
        }
        if let Some(listener) = listener {
            listener.on_discovery_finished();
        }
    }

    fn handle_channel(&self, origin: RoleId, channel: EstablishedChannel) {
        let _notify = self.notify.lock();
        let mut state = self.state.lock();
        if !state.active.is_live(origin) {
            warn!(
                "Dropping {} channel from superseded role {}",
                channel.direction(),
                origin
            );
            return;
        }

        // Release the role before handing the channel on.
        state.retire_active();
        let listener = state.listener.clone();
        drop(state);

        match listener {
            Some(listener) => {
                info!("Handing off {} channel", channel.direction());
                listener.on_channel_established(channel);
            }
            None => warn!(
                "No channel listener registered, closing {} channel",
                channel.direction()
            ),
        }
    }

    fn handle_failure(&self, origin: RoleId, error: ArbiterError) {
        let _notify = self.notify.lock();
        let mut state = self.state.lock();
        if !state.active.is_live(origin) {
            debug!("Ignoring failure from superseded role {}: {}", origin, error);
            return;
        }

        let role = state.retire_active();
        let listener = state.listener.clone();
        drop(state);

        warn!("{} role failed: {}", role, error);
        if let Some(listener) = listener {
            listener.on_connection_failure(&error);
        }
    }
}
