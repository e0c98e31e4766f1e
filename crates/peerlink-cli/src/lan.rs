//! LAN transport adapter
//!
//! Stands in for a short-range radio on an ordinary network:
//! - discoverability is a UDP beacon broadcast for the requested window
//! - discovery listens for beacons carrying our service identifier
//! - channels are TCP streams opened with a 16-byte service preamble

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use peerlink_core::{
    Accepted, ByteStream, ListeningEndpoint, PeerAddress, PeerHandle, ScanEvent, ServiceId,
    TransportAdapter, TransportError,
};

const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BEACON_SIZE: usize = 512;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Settings for the LAN transport
#[derive(Debug, Clone)]
pub struct LanTransportConfig {
    pub device_name: String,
    pub bind_address: Ipv4Addr,
    pub listen_port: u16,
    pub beacon_port: u16,
    pub broadcast_address: Ipv4Addr,
    pub beacon_interval: Duration,
}

// ----------------------------------------------------------------------------
// Beacons
// ----------------------------------------------------------------------------

/// Announcement broadcast while discoverable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub service: Uuid,
    pub instance: Uuid,
    pub name: String,
    pub port: u16,
}

impl Beacon {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// The peer this beacon describes, as seen from `from`
    pub fn peer(&self, from: SocketAddr) -> PeerHandle {
        PeerHandle::new(SocketAddr::new(from.ip(), self.port).to_string().as_str())
            .with_name(self.name.clone())
    }
}

struct Advertiser {
    until: Instant,
    handle: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// LAN Transport
// ----------------------------------------------------------------------------

/// `TransportAdapter` over UDP beacons and TCP streams
pub struct LanTransport {
    config: LanTransportConfig,
    instance: Uuid,
    service: ServiceId,
    /// Port the last endpoint actually bound, advertised in beacons
    bound_port: AtomicU16,
    advertiser: Mutex<Option<Advertiser>>,
}

impl LanTransport {
    pub fn new(config: LanTransportConfig, service: ServiceId) -> Self {
        Self {
            config,
            instance: Uuid::new_v4(),
            service,
            bound_port: AtomicU16::new(0),
            advertiser: Mutex::new(None),
        }
    }

    /// Bind the TCP endpoint; must be called from within a tokio runtime
    pub fn bind_endpoint(&self, service: &ServiceId) -> Result<LanEndpoint, TransportError> {
        let addr = SocketAddrV4::new(self.config.bind_address, self.config.listen_port);
        let std_listener = std::net::TcpListener::bind(addr)
            .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        let listener =
            TcpListener::from_std(std_listener).map_err(|e| TransportError::Bind(e.to_string()))?;

        let local = listener
            .local_addr()
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        self.bound_port.store(local.port(), Ordering::SeqCst);

        info!("Listening on {}", local);
        Ok(LanEndpoint {
            listener,
            service: *service,
        })
    }

    fn beacon(&self) -> Beacon {
        Beacon {
            service: *self.service.as_uuid(),
            instance: self.instance,
            name: self.config.device_name.clone(),
            port: self.advertised_port(),
        }
    }

    fn advertised_port(&self) -> u16 {
        match self.bound_port.load(Ordering::SeqCst) {
            0 => self.config.listen_port,
            port => port,
        }
    }

    fn open_scan_socket(&self) -> Result<UdpSocket, TransportError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.beacon_port);
        let socket = std::net::UdpSocket::bind(addr)
            .map_err(|e| TransportError::Scan(format!("{}: {}", addr, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        UdpSocket::from_std(socket).map_err(|e| TransportError::Scan(e.to_string()))
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        if let Some(advertiser) = self.advertiser.lock().take() {
            advertiser.handle.abort();
        }
    }
}

struct ScanState {
    socket: UdpSocket,
    deadline: Instant,
    service: Uuid,
    instance: Uuid,
    seen: HashSet<PeerAddress>,
    done: bool,
}

impl ScanState {
    /// Turn a datagram into a newly seen peer, if it is one
    fn admit(&mut self, bytes: &[u8], from: SocketAddr) -> Option<PeerHandle> {
        let beacon = Beacon::decode(bytes)?;
        if beacon.service != self.service || beacon.instance == self.instance {
            return None;
        }
        let peer = beacon.peer(from);
        self.seen.insert(peer.address.clone()).then_some(peer)
    }
}

#[async_trait]
impl TransportAdapter for LanTransport {
    fn listen(&self, service: &ServiceId) -> Result<Box<dyn ListeningEndpoint>, TransportError> {
        Ok(Box::new(self.bind_endpoint(service)?))
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        service: &ServiceId,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            peer: peer.address.to_string(),
            reason,
        };

        let addr: SocketAddr = peer
            .address
            .as_str()
            .parse()
            .map_err(|e| connect_error(format!("invalid address: {}", e)))?;
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        stream
            .write_all(service.as_uuid().as_bytes())
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        debug!("Opened stream to {}", addr);
        Ok(Box::new(stream))
    }

    fn scan(&self, window: Duration) -> Result<BoxStream<'static, ScanEvent>, TransportError> {
        let state = ScanState {
            socket: self.open_scan_socket()?,
            deadline: Instant::now() + window,
            service: *self.service.as_uuid(),
            instance: self.instance,
            seen: HashSet::new(),
            done: false,
        };

        let events = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let mut buf = [0u8; MAX_BEACON_SIZE];
            loop {
                let received =
                    tokio::time::timeout_at(state.deadline, state.socket.recv_from(&mut buf)).await;
                match received {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        warn!("Beacon socket failed: {}", e);
                        break;
                    }
                    Ok(Ok((len, from))) => {
                        if let Some(peer) = state.admit(&buf[..len], from) {
                            return Some((ScanEvent::Discovered(peer), state));
                        }
                    }
                }
            }
            state.done = true;
            Some((ScanEvent::Finished, state))
        });

        Ok(events.boxed())
    }

    async fn ensure_discoverable(&self, window: Duration) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| TransportError::Discoverability(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::Discoverability(e.to_string()))?;

        let target = SocketAddrV4::new(self.config.broadcast_address, self.config.beacon_port);
        let payload = self.beacon().encode();
        let interval = self.config.beacon_interval;
        let until = Instant::now() + window;

        let handle = tokio::spawn(async move {
            while Instant::now() < until {
                if let Err(e) = socket.send_to(&payload, target).await {
                    warn!("Failed to send beacon: {}", e);
                }
                tokio::time::sleep(interval).await;
            }
            debug!("Beacon window ended");
        });

        if let Some(previous) = self.advertiser.lock().replace(Advertiser { until, handle }) {
            previous.handle.abort();
        }
        info!("Discoverable for {:?}", window);
        Ok(())
    }

    async fn is_discoverable(&self) -> bool {
        self.advertiser
            .lock()
            .as_ref()
            .map(|a| Instant::now() < a.until && !a.handle.is_finished())
            .unwrap_or(false)
    }
}

// ----------------------------------------------------------------------------
// Listening Endpoint
// ----------------------------------------------------------------------------

/// TCP listening endpoint that only admits streams with our preamble
pub struct LanEndpoint {
    listener: TcpListener,
    service: ServiceId,
}

impl LanEndpoint {
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl ListeningEndpoint for LanEndpoint {
    async fn accept(&mut self) -> Result<Accepted, TransportError> {
        loop {
            let (mut stream, from) = self
                .listener
                .accept()
                .await
                .map_err(|e| TransportError::Accept(e.to_string()))?;

            let mut preamble = [0u8; 16];
            let read =
                tokio::time::timeout(PREAMBLE_TIMEOUT, stream.read_exact(&mut preamble)).await;
            match read {
                Ok(Ok(_)) if preamble == *self.service.as_uuid().as_bytes() => {
                    return Ok(Accepted::new(
                        Box::new(stream),
                        Some(PeerAddress::new(from.to_string())),
                    ));
                }
                Ok(Ok(_)) => warn!("Rejected {}: wrong service", from),
                Ok(Err(e)) => warn!("Rejected {}: {}", from, e),
                Err(_) => warn!("Rejected {}: no preamble", from),
            }
        }
    }
}
