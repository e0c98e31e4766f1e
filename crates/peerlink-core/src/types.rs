//! Core data model: peers, service identifiers, roles and the discovery set

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Opaque transport address of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Relative signal strength sample in dBm, captured when a peer was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalStrength(pub i16);

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dBm", self.0)
    }
}

/// A peer as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Transport address used to connect
    pub address: PeerAddress,
    /// Advertised display name, if the transport exposed one
    pub name: Option<String>,
    /// Signal strength sampled at discovery time
    pub signal_strength: Option<SignalStrength>,
}

impl PeerHandle {
    pub fn new(address: impl Into<PeerAddress>) -> Self {
        Self {
            address: address.into(),
            name: None,
            signal_strength: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_signal_strength(mut self, dbm: i16) -> Self {
        self.signal_strength = Some(SignalStrength(dbm));
        self
    }

    /// Name to show a user, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.address.as_str())
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal_strength {
            Some(rssi) => write!(f, "{}  {}", self.display_name(), rssi),
            None => f.write_str(self.display_name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Service Identifier
// ----------------------------------------------------------------------------

/// Fixed identifier peers listen and connect under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    /// Identifier shared by every build of the chat application
    pub const DEFAULT: ServiceId =
        ServiceId(Uuid::from_u128(0x5fc104c0_0fe6_448d_8a7d_06a9f16cef94));

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ----------------------------------------------------------------------------
// Roles
// ----------------------------------------------------------------------------

/// The activity the arbiter is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Idle,
    Scanning,
    Accepting,
    Connecting,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Idle => write!(f, "idle"),
            Role::Scanning => write!(f, "scanning"),
            Role::Accepting => write!(f, "accepting"),
            Role::Connecting => write!(f, "connecting"),
        }
    }
}

/// Identity of one sub-component instance
///
/// Minted fresh for every scanner, acceptor and initiator so callbacks from a
/// superseded instance can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(u64);

impl RoleId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Discovery Set
// ----------------------------------------------------------------------------

/// Peers found by the current discovery session, in the order they arrived
///
/// No deduplication happens here; the set holds whatever the scanner emits.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySet {
    peers: Vec<PeerHandle>,
}

impl DiscoverySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, peer: PeerHandle) {
        self.peers.push(peer);
    }

    pub fn get(&self, index: usize) -> Option<&PeerHandle> {
        self.peers.get(index)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.clone()
    }
}
