//! Scripted transport and recording collaborators for tests
//!
//! `MockTransport` never touches a radio: tests push discovery events,
//! inbound streams and connect outcomes into it and watch the counters.
//! Streams are in-memory `tokio::io::duplex` pairs; the far half is handed
//! back to the test.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as scan_mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::callbacks::{CallbackSink, RoleCallbacks};
use crate::channel::{ByteStream, EstablishedChannel};
use crate::errors::{ArbiterError, TransportError};
use crate::listener::{ChannelListener, DeviceSelectionPresenter};
use crate::transport::{Accepted, ListeningEndpoint, ScanEvent, TransportAdapter};
use crate::types::{PeerAddress, PeerHandle, RoleId, ServiceId};

const DUPLEX_CAPACITY: usize = 4096;
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(60);

type AcceptOutcome = Result<Accepted, TransportError>;
type ConnectOutcome = Result<Box<dyn ByteStream>, TransportError>;

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// Counters observed by tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub scan_calls: usize,
    pub listen_calls: usize,
    pub accept_calls: usize,
    pub connect_calls: usize,
    pub discoverability_requests: usize,
    pub endpoints_closed: usize,
}

#[derive(Default)]
struct Counters {
    scan_calls: AtomicUsize,
    listen_calls: AtomicUsize,
    accept_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    discoverability_requests: AtomicUsize,
    endpoints_closed: AtomicUsize,
}

struct MockInner {
    counters: Counters,
    discoverable: AtomicBool,
    scan_failure: Mutex<Option<String>>,
    listen_failure: Mutex<Option<String>>,
    scan_tx: Mutex<Option<scan_mpsc::UnboundedSender<ScanEvent>>>,
    accept_tx: Mutex<Option<mpsc::UnboundedSender<AcceptOutcome>>>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectOutcome>>,
}

/// In-memory `TransportAdapter` driven by the test
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport that is already discoverable and has nothing scripted
    pub fn new() -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                counters: Counters::default(),
                discoverable: AtomicBool::new(true),
                scan_failure: Mutex::new(None),
                listen_failure: Mutex::new(None),
                scan_tx: Mutex::new(None),
                accept_tx: Mutex::new(None),
                connect_tx,
                connect_rx: tokio::sync::Mutex::new(connect_rx),
            }),
        }
    }

    pub fn stats(&self) -> MockStats {
        let c = &self.inner.counters;
        MockStats {
            scan_calls: c.scan_calls.load(Ordering::SeqCst),
            listen_calls: c.listen_calls.load(Ordering::SeqCst),
            accept_calls: c.accept_calls.load(Ordering::SeqCst),
            connect_calls: c.connect_calls.load(Ordering::SeqCst),
            discoverability_requests: c.discoverability_requests.load(Ordering::SeqCst),
            endpoints_closed: c.endpoints_closed.load(Ordering::SeqCst),
        }
    }

    pub fn set_discoverable(&self, discoverable: bool) {
        self.inner.discoverable.store(discoverable, Ordering::SeqCst);
    }

    pub fn is_discoverable_now(&self) -> bool {
        self.inner.discoverable.load(Ordering::SeqCst)
    }

    // Discovery scripting

    /// Make the next `scan` call fail
    pub fn fail_next_scan(&self, reason: &str) {
        *self.inner.scan_failure.lock() = Some(reason.to_string());
    }

    /// Emit a discovered peer on the current scan
    pub fn discover(&self, peer: PeerHandle) {
        self.emit(ScanEvent::Discovered(peer));
    }

    /// Emit the finished marker on the current scan
    pub fn finish_scan(&self) {
        self.emit(ScanEvent::Finished);
    }

    /// End the current scan stream without a finished marker
    pub fn end_scan_stream(&self) {
        self.inner.scan_tx.lock().take();
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = self.inner.scan_tx.lock().as_ref() {
            let _ = tx.unbounded_send(event);
        }
    }

    // Accept scripting

    /// Make the next `listen` call fail
    pub fn fail_next_listen(&self, reason: &str) {
        *self.inner.listen_failure.lock() = Some(reason.to_string());
    }

    /// Queue an inbound connection on the current endpoint
    ///
    /// Returns the remote half of the stream.
    pub fn deliver_inbound(&self, remote: &str) -> DuplexStream {
        let (local, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        let accepted = Accepted::new(Box::new(local), Some(PeerAddress::new(remote)));
        self.push_accept(Ok(accepted));
        far
    }

    /// Queue an accept error on the current endpoint
    pub fn fail_accept(&self, reason: &str) {
        self.push_accept(Err(TransportError::Accept(reason.to_string())));
    }

    fn push_accept(&self, outcome: AcceptOutcome) {
        if let Some(tx) = self.inner.accept_tx.lock().as_ref() {
            let _ = tx.send(outcome);
        }
    }

    // Connect scripting

    /// Let the next connect call succeed; returns the remote half
    pub fn complete_connect(&self) -> DuplexStream {
        let (local, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        let _ = self.inner.connect_tx.send(Ok(Box::new(local)));
        far
    }

    /// Let the next connect call fail
    pub fn fail_connect(&self, reason: &str) {
        let _ = self.inner.connect_tx.send(Err(TransportError::Connect {
            peer: "mock".to_string(),
            reason: reason.to_string(),
        }));
    }

    // Synchronization helpers

    /// Wait until some worker is blocked in `accept`
    pub async fn wait_for_accept(&self) {
        self.wait_until(|stats| stats.accept_calls > 0).await
    }

    /// Wait until some worker has called `connect`
    pub async fn wait_for_connect(&self) {
        self.wait_until(|stats| stats.connect_calls > 0).await
    }

    pub async fn wait_until(&self, condition: impl Fn(&MockStats) -> bool) {
        let poll = async {
            while !condition(&self.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(EVENT_TIMEOUT, poll).await.is_err() {
            panic!("mock transport condition not reached: {:?}", self.stats());
        }
    }
}

struct MockEndpoint {
    rx: mpsc::UnboundedReceiver<AcceptOutcome>,
    inner: Arc<MockInner>,
}

#[async_trait]
impl ListeningEndpoint for MockEndpoint {
    async fn accept(&mut self) -> Result<Accepted, TransportError> {
        self.inner.counters.accept_calls.fetch_add(1, Ordering::SeqCst);
        match self.rx.recv().await {
            Some(outcome) => outcome,
            None => Err(TransportError::Closed),
        }
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.inner.counters.endpoints_closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn listen(&self, _service: &ServiceId) -> Result<Box<dyn ListeningEndpoint>, TransportError> {
        self.inner.counters.listen_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.inner.listen_failure.lock().take() {
            return Err(TransportError::Bind(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.accept_tx.lock() = Some(tx);
        Ok(Box::new(MockEndpoint {
            rx,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn connect(
        &self,
        _peer: &PeerHandle,
        _service: &ServiceId,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        self.inner.counters.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.inner.connect_rx.lock().await;
        match outcomes.recv().await {
            Some(outcome) => outcome,
            None => Err(TransportError::Closed),
        }
    }

    fn scan(&self, _window: Duration) -> Result<BoxStream<'static, ScanEvent>, TransportError> {
        self.inner.counters.scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.inner.scan_failure.lock().take() {
            return Err(TransportError::Scan(reason));
        }

        let (tx, rx) = scan_mpsc::unbounded();
        *self.inner.scan_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn ensure_discoverable(&self, _window: Duration) -> Result<(), TransportError> {
        self.inner
            .counters
            .discoverability_requests
            .fetch_add(1, Ordering::SeqCst);
        self.inner.discoverable.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_discoverable(&self) -> bool {
        self.inner.discoverable.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Event Streams
// ----------------------------------------------------------------------------

/// Receiving side of a recorder
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: std::fmt::Debug> EventStream<T> {
    /// Next recorded event, or `None` if nothing arrives in time
    pub async fn next(&mut self) -> Option<T> {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Panic if anything is recorded within a short grace period
    pub async fn assert_quiet(&mut self) {
        tokio::time::sleep(QUIET_PERIOD).await;
        if let Ok(event) = self.rx.try_recv() {
            panic!("unexpected event: {:?}", event);
        }
    }

    /// Everything recorded so far
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

// ----------------------------------------------------------------------------
// Recording Collaborators
// ----------------------------------------------------------------------------

/// What a sub-component reported to its sink
#[derive(Debug)]
pub enum SinkEvent {
    Peer(RoleId, PeerHandle),
    Finished(RoleId),
    Channel(RoleId, EstablishedChannel),
    Failed(RoleId, ArbiterError),
}

/// Callback sink that records into an `EventStream`
pub struct CallbackRecorder {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl CallbackRecorder {
    pub fn new() -> (CallbackSink, EventStream<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), EventStream { rx })
    }
}

impl RoleCallbacks for CallbackRecorder {
    fn peer_discovered(&self, origin: RoleId, peer: PeerHandle) {
        let _ = self.tx.send(SinkEvent::Peer(origin, peer));
    }

    fn discovery_finished(&self, origin: RoleId) {
        let _ = self.tx.send(SinkEvent::Finished(origin));
    }

    fn channel_established(&self, origin: RoleId, channel: EstablishedChannel) {
        let _ = self.tx.send(SinkEvent::Channel(origin, channel));
    }

    fn role_failed(&self, origin: RoleId, error: ArbiterError) {
        let _ = self.tx.send(SinkEvent::Failed(origin, error));
    }
}

/// What the application listener was told
#[derive(Debug)]
pub enum ListenerEvent {
    Channel(EstablishedChannel),
    Failure(String),
    PeerDiscovered(PeerHandle),
    DiscoveryFinished,
}

/// `ChannelListener` that records into an `EventStream`
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<ListenerEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, EventStream<ListenerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), EventStream { rx })
    }
}

impl ChannelListener for RecordingListener {
    fn on_channel_established(&self, channel: EstablishedChannel) {
        let _ = self.tx.send(ListenerEvent::Channel(channel));
    }

    fn on_connection_failure(&self, error: &ArbiterError) {
        let _ = self.tx.send(ListenerEvent::Failure(error.to_string()));
    }

    fn on_peer_discovered(&self, peer: &PeerHandle) {
        let _ = self.tx.send(ListenerEvent::PeerDiscovered(peer.clone()));
    }

    fn on_discovery_finished(&self) {
        let _ = self.tx.send(ListenerEvent::DiscoveryFinished);
    }
}

/// Presenter that remembers every list it was shown
#[derive(Default)]
pub struct RecordingPresenter {
    presented: Mutex<Vec<Vec<PeerHandle>>>,
    dismissals: AtomicUsize,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_presented(&self) -> Option<Vec<PeerHandle>> {
        self.presented.lock().last().cloned()
    }

    pub fn present_count(&self) -> usize {
        self.presented.lock().len()
    }

    pub fn dismiss_count(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }
}

impl DeviceSelectionPresenter for RecordingPresenter {
    fn present(&self, peers: &[PeerHandle]) {
        self.presented.lock().push(peers.to_vec());
    }

    fn dismiss(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}
