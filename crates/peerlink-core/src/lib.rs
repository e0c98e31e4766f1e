//! Connection arbitration core for peer-to-peer chat
//!
//! Two devices with no prior addressing information discover each other
//! over a short-range transport and end up with exactly one bidirectional
//! channel, which is handed to the application's chat layer.
//!
//! ## Architecture
//!
//! - [`RoleArbiter`] - the only API the application drives; keeps exactly one
//!   of scanning, accepting or connecting alive
//! - [`DeviceScanner`] - bounded discovery sessions
//! - [`ConnectionAcceptor`] - listening endpoint and accept loop, bounded by
//!   a [`DiscoverabilityTimer`]
//! - [`ConnectionInitiator`] - a single outbound attempt
//! - [`TransportAdapter`] - the transport primitives the core consumes
//! - [`ChannelListener`] / [`DeviceSelectionPresenter`] - collaborators the
//!   application implements
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerlink_core::{
//!     ArbiterConfig, ChannelListener, EstablishedChannel, RoleArbiter, TransportAdapter,
//! };
//!
//! struct Chat;
//!
//! impl ChannelListener for Chat {
//!     fn on_channel_established(&self, channel: EstablishedChannel) {
//!         println!("{} channel ready", channel.direction());
//!     }
//! }
//!
//! # async fn example(transport: Arc<dyn TransportAdapter>) {
//! let arbiter = RoleArbiter::with_current_runtime(transport, ArbiterConfig::default());
//! arbiter.set_channel_listener(Some(Arc::new(Chat)));
//! arbiter.start_accepting();
//! # }
//! ```

mod acceptor;
mod arbiter;
mod callbacks;
mod cancel;
mod channel;
mod config;
mod errors;
mod initiator;
mod listener;
mod scanner;
mod timer;
mod transport;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Public API exports
pub use acceptor::ConnectionAcceptor;
pub use arbiter::RoleArbiter;
pub use callbacks::{CallbackSink, RoleCallbacks};
pub use cancel::CancelSignal;
pub use channel::{ByteStream, Direction, EstablishedChannel};
pub use config::ArbiterConfig;
pub use errors::{ArbiterError, ArbiterResult, TransportError};
pub use initiator::ConnectionInitiator;
pub use listener::{ChannelListener, DeviceSelectionPresenter};
pub use scanner::DeviceScanner;
pub use timer::DiscoverabilityTimer;
pub use transport::{Accepted, ListeningEndpoint, ScanEvent, TransportAdapter};
pub use types::{DiscoverySet, PeerAddress, PeerHandle, Role, RoleId, ServiceId, SignalStrength};
