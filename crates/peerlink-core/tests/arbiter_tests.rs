//! Arbitration behaviour driven through the public API
//!
//! Every test runs the real scanner, acceptor and initiator against the
//! scripted `MockTransport`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_core::testing::{
    EventStream, ListenerEvent, MockTransport, RecordingListener, RecordingPresenter,
};
use peerlink_core::{
    ArbiterConfig, ArbiterError, ChannelListener, DeviceSelectionPresenter, Direction,
    EstablishedChannel, PeerHandle, Role, RoleArbiter, SignalStrength,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Harness {
    transport: MockTransport,
    arbiter: RoleArbiter,
    presenter: Arc<RecordingPresenter>,
    events: EventStream<ListenerEvent>,
}

fn harness_with(config: ArbiterConfig) -> Harness {
    let transport = MockTransport::new();
    let arbiter = RoleArbiter::with_current_runtime(Arc::new(transport.clone()), config);
    let (listener, events) = RecordingListener::new();
    let presenter = RecordingPresenter::new();
    arbiter.set_channel_listener(Some(listener));
    arbiter.set_presenter(Some(presenter.clone()));
    Harness {
        transport,
        arbiter,
        presenter,
        events,
    }
}

fn harness() -> Harness {
    harness_with(ArbiterConfig::default())
}

fn peer(address: &str, rssi: i16) -> PeerHandle {
    PeerHandle::new(address).with_signal_strength(rssi)
}

fn addresses(peers: &[PeerHandle]) -> Vec<&str> {
    peers.iter().map(|p| p.address.as_str()).collect()
}

fn start(arbiter: &RoleArbiter, role: Role) {
    match role {
        Role::Scanning => arbiter.start_discovery(),
        Role::Accepting => arbiter.start_accepting(),
        Role::Connecting => arbiter.attempt_connect(PeerHandle::new("target")),
        Role::Idle => {}
    }
}

async fn expect_channel(events: &mut EventStream<ListenerEvent>) -> EstablishedChannel {
    match events.next().await {
        Some(ListenerEvent::Channel(channel)) => channel,
        other => panic!("expected channel, got {:?}", other),
    }
}

async fn expect_failure(events: &mut EventStream<ListenerEvent>) -> String {
    match events.next().await {
        Some(ListenerEvent::Failure(reason)) => reason,
        other => panic!("expected failure, got {:?}", other),
    }
}

async fn expect_discovered(events: &mut EventStream<ListenerEvent>) -> PeerHandle {
    match events.next().await {
        Some(ListenerEvent::PeerDiscovered(peer)) => peer,
        other => panic!("expected discovered peer, got {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Role Exclusivity
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_starting_a_role_cancels_the_previous_one() {
    let roles = [Role::Scanning, Role::Accepting, Role::Connecting];

    for first in roles {
        for second in roles.into_iter().filter(|r| *r != first) {
            let mut h = harness();
            start(&h.arbiter, first);
            assert_eq!(h.arbiter.role(), first);

            start(&h.arbiter, second);
            assert_eq!(h.arbiter.role(), second, "{} -> {}", first, second);

            match first {
                Role::Scanning => {
                    h.transport.discover(PeerHandle::new("late"));
                    h.transport.finish_scan();
                }
                Role::Accepting => {
                    h.transport.wait_until(|s| s.endpoints_closed == 1).await;
                }
                Role::Connecting => {
                    let _far = h.transport.complete_connect();
                }
                Role::Idle => unreachable!(),
            }

            h.events.assert_quiet().await;
            assert_eq!(h.arbiter.role(), second, "{} -> {} after cancel", first, second);
            assert!(h.arbiter.discovered_peers().is_empty());
        }
    }
}

#[tokio::test]
async fn test_starting_the_active_role_again_is_a_noop() {
    let h = harness();

    h.arbiter.start_accepting();
    h.arbiter.start_accepting();
    h.arbiter.start_discovery();
    h.arbiter.start_discovery();

    assert_eq!(h.transport.stats().listen_calls, 1);
    assert_eq!(h.transport.stats().scan_calls, 1);
}

#[tokio::test]
async fn test_first_connect_attempt_wins() {
    let mut h = harness();

    h.arbiter.attempt_connect(peer("first", -40));
    h.arbiter.attempt_connect(peer("second", -70));
    let _far = h.transport.complete_connect();

    let channel = expect_channel(&mut h.events).await;
    assert_eq!(channel.remote().map(|a| a.as_str()), Some("first"));
    assert_eq!(channel.signal_strength(), Some(SignalStrength(-40)));
    assert_eq!(h.transport.stats().connect_calls, 1);
}

// ----------------------------------------------------------------------------
// Accepting
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_accepted_channel_is_handed_off_once() {
    let mut h = harness();
    h.arbiter.start_accepting();

    let _far_a = h.transport.deliver_inbound("peer-a");
    let _far_b = h.transport.deliver_inbound("peer-b");

    let channel = expect_channel(&mut h.events).await;
    assert_eq!(channel.direction(), Direction::Inbound);
    assert_eq!(channel.remote().map(|a| a.as_str()), Some("peer-a"));
    assert_eq!(h.arbiter.role(), Role::Idle);

    h.events.assert_quiet().await;
    h.transport.wait_until(|s| s.endpoints_closed == 1).await;
}

#[tokio::test]
async fn test_accept_error_fails_once_without_retry() {
    let mut h = harness();
    h.arbiter.start_accepting();

    h.transport.fail_accept("socket reset");

    let reason = expect_failure(&mut h.events).await;
    assert!(reason.contains("socket reset"), "{}", reason);
    h.events.assert_quiet().await;
    assert_eq!(h.transport.stats().accept_calls, 1);
    assert_eq!(h.arbiter.role(), Role::Idle);
}

#[tokio::test]
async fn test_bind_failure_is_reported_and_leaves_idle() {
    let mut h = harness();
    h.transport.fail_next_listen("address in use");

    h.arbiter.start_accepting();

    let reason = expect_failure(&mut h.events).await;
    assert!(reason.contains("address in use"), "{}", reason);
    assert_eq!(h.arbiter.role(), Role::Idle);
    assert_eq!(h.transport.stats().accept_calls, 0);

    h.arbiter.start_accepting();
    assert_eq!(h.arbiter.role(), Role::Accepting);
}

#[tokio::test]
async fn test_discoverability_window_ends_accepting() {
    let config = ArbiterConfig::default().with_discoverability_window(Duration::from_millis(50));
    let mut h = harness_with(config);
    h.transport.set_discoverable(false);

    h.arbiter.start_accepting();

    let reason = expect_failure(&mut h.events).await;
    assert!(reason.contains("Discoverability window"), "{}", reason);
    assert_eq!(h.arbiter.role(), Role::Idle);
    assert_eq!(h.transport.stats().discoverability_requests, 1);
    h.transport.wait_until(|s| s.endpoints_closed == 1).await;
}

#[tokio::test]
async fn test_timer_of_stopped_acceptor_never_reaches_its_successor() {
    let config = ArbiterConfig::default().with_discoverability_window(Duration::from_millis(60));
    let mut h = harness_with(config);
    h.transport.set_discoverable(false);

    h.arbiter.start_accepting();
    h.transport.wait_for_accept().await;
    h.arbiter.stop_accepting();

    // The successor finds the device already discoverable and arms no timer.
    h.arbiter.start_accepting();
    tokio::time::sleep(Duration::from_millis(150)).await;

    h.events.assert_quiet().await;
    assert_eq!(h.arbiter.role(), Role::Accepting);
}

// ----------------------------------------------------------------------------
// Connecting
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_failure_resets_to_idle() {
    let mut h = harness();
    h.arbiter.attempt_connect(peer("peer-a", -50));

    h.transport.fail_connect("host unreachable");

    let reason = expect_failure(&mut h.events).await;
    assert!(reason.contains("host unreachable"), "{}", reason);
    assert_eq!(h.arbiter.role(), Role::Idle);
    h.events.assert_quiet().await;
}

#[tokio::test]
async fn test_stopped_connect_never_reports() {
    let mut h = harness();
    h.arbiter.attempt_connect(peer("peer-a", -50));
    h.transport.wait_for_connect().await;

    h.arbiter.stop_connecting();
    let _far = h.transport.complete_connect();

    h.events.assert_quiet().await;
    assert_eq!(h.arbiter.role(), Role::Idle);
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_discovery_set_lives_for_one_session() {
    let mut h = harness();
    h.arbiter.start_discovery();
    assert!(h.arbiter.discovered_peers().is_empty());

    h.transport.discover(peer("A", -40));
    h.transport.discover(peer("B", -65));
    assert_eq!(expect_discovered(&mut h.events).await.address.as_str(), "A");
    assert_eq!(expect_discovered(&mut h.events).await.address.as_str(), "B");

    assert_eq!(addresses(&h.arbiter.discovered_peers()), ["A", "B"]);
    assert_eq!(h.presenter.present_count(), 2);
    assert_eq!(addresses(&h.presenter.last_presented().unwrap()), ["A", "B"]);

    h.transport.finish_scan();
    assert!(matches!(h.events.next().await, Some(ListenerEvent::DiscoveryFinished)));
    assert!(h.arbiter.discovered_peers().is_empty());
    assert_eq!(h.arbiter.role(), Role::Idle);
}

#[tokio::test]
async fn test_connect_during_discovery_cancels_scan() {
    let mut h = harness();
    h.arbiter.start_discovery();
    let dismissed_at_start = h.presenter.dismiss_count();

    let a = peer("A", -40);
    h.transport.discover(a.clone());
    expect_discovered(&mut h.events).await;

    h.arbiter.attempt_connect(a);

    assert_eq!(h.arbiter.role(), Role::Connecting);
    assert!(h.arbiter.discovered_peers().is_empty());
    assert_eq!(h.presenter.dismiss_count(), dismissed_at_start + 1);

    h.transport.discover(peer("B", -60));
    h.transport.finish_scan();
    h.events.assert_quiet().await;
    assert_eq!(h.presenter.present_count(), 1);
    assert_eq!(h.arbiter.role(), Role::Connecting);
}

#[tokio::test]
async fn test_choosing_a_peer_connects_with_its_signal_strength() {
    let mut h = harness();
    h.arbiter.start_discovery();
    h.transport.discover(peer("A", -40));
    h.transport.discover(peer("B", -72));
    expect_discovered(&mut h.events).await;
    expect_discovered(&mut h.events).await;

    let chosen = h.arbiter.choose_peer(1).unwrap();
    assert_eq!(chosen.address.as_str(), "B");
    assert_eq!(h.arbiter.role(), Role::Connecting);
    assert!(h.arbiter.discovered_peers().is_empty());

    let _far = h.transport.complete_connect();
    let channel = expect_channel(&mut h.events).await;
    assert_eq!(channel.direction(), Direction::Outbound);
    assert_eq!(channel.signal_strength(), Some(SignalStrength(-72)));
    assert_eq!(h.arbiter.role(), Role::Idle);
}

#[tokio::test]
async fn test_choosing_a_missing_peer_is_an_error() {
    let h = harness();
    h.arbiter.start_discovery();

    let result = h.arbiter.choose_peer(0);

    assert!(matches!(
        result,
        Err(ArbiterError::NoSuchPeer {
            index: 0,
            available: 0
        })
    ));
    assert_eq!(h.arbiter.role(), Role::Scanning);
}

#[tokio::test]
async fn test_scan_that_cannot_start_is_reported_once() {
    let mut h = harness();
    h.transport.fail_next_scan("adapter off");

    h.arbiter.start_discovery();

    let reason = expect_failure(&mut h.events).await;
    assert!(reason.contains("Discovery could not start"), "{}", reason);
    assert!(reason.contains("adapter off"), "{}", reason);
    assert_eq!(h.arbiter.role(), Role::Idle);
    h.events.assert_quiet().await;
}

// ----------------------------------------------------------------------------
// Stop Operations
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_operations_are_idempotent() {
    let mut h = harness();

    h.arbiter.stop_discovery();
    h.arbiter.stop_accepting();
    h.arbiter.stop_connecting();
    assert_eq!(h.arbiter.role(), Role::Idle);

    h.arbiter.start_discovery();
    h.arbiter.stop_discovery();
    let dismissed = h.presenter.dismiss_count();
    h.arbiter.stop_discovery();
    assert_eq!(h.presenter.dismiss_count(), dismissed);

    h.arbiter.start_accepting();
    h.arbiter.stop_accepting();
    h.transport.wait_until(|s| s.endpoints_closed == 1).await;
    h.arbiter.stop_accepting();

    h.arbiter.attempt_connect(peer("A", -40));
    h.arbiter.stop_connecting();
    let before = h.transport.stats();
    h.arbiter.stop_connecting();

    h.events.assert_quiet().await;
    assert_eq!(h.transport.stats(), before);
    assert_eq!(h.arbiter.role(), Role::Idle);
}

#[tokio::test]
async fn test_stop_only_affects_its_own_role() {
    let h = harness();
    h.arbiter.start_accepting();

    h.arbiter.stop_discovery();
    h.arbiter.stop_connecting();

    assert_eq!(h.arbiter.role(), Role::Accepting);
}

// ----------------------------------------------------------------------------
// Listener Handling
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_listener_replacement_applies_to_later_handoffs() {
    let mut h = harness();
    let (second, mut second_events) = RecordingListener::new();

    h.arbiter.start_accepting();
    h.arbiter.set_channel_listener(Some(second));
    let _far = h.transport.deliver_inbound("peer-a");

    let channel = expect_channel(&mut second_events).await;
    assert_eq!(channel.direction(), Direction::Inbound);
    h.events.assert_quiet().await;
}

/// Restarts accepting from inside the failure callback
struct Restarter {
    arbiter: Mutex<Option<RoleArbiter>>,
    failures: Mutex<usize>,
}

impl ChannelListener for Restarter {
    fn on_channel_established(&self, _channel: EstablishedChannel) {}

    fn on_connection_failure(&self, _error: &ArbiterError) {
        *self.failures.lock() += 1;
        if let Some(arbiter) = self.arbiter.lock().as_ref() {
            arbiter.start_accepting();
        }
    }
}

#[tokio::test]
async fn test_listener_may_call_back_into_the_arbiter() {
    let transport = MockTransport::new();
    let arbiter = RoleArbiter::with_current_runtime(
        Arc::new(transport.clone()),
        ArbiterConfig::default(),
    );
    let restarter = Arc::new(Restarter {
        arbiter: Mutex::new(Some(arbiter.clone())),
        failures: Mutex::new(0),
    });
    arbiter.set_channel_listener(Some(restarter.clone()));

    arbiter.attempt_connect(PeerHandle::new("peer-a"));
    transport.fail_connect("refused");

    transport.wait_until(|s| s.listen_calls == 1).await;
    assert_eq!(arbiter.role(), Role::Accepting);
    assert_eq!(*restarter.failures.lock(), 1);

    // Break the listener -> arbiter cycle.
    restarter.arbiter.lock().take();
}

// ----------------------------------------------------------------------------
// Concurrent Role Changes
// ----------------------------------------------------------------------------

/// Presenter and listener that write into one shared timeline
///
/// The first `present` can be held open until `release` fires or a short
/// timeout passes, keeping a discovery callback in flight on its worker.
struct Timeline {
    entries: Mutex<Vec<String>>,
    entered: tokio::sync::mpsc::UnboundedSender<()>,
    release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

/// The timeline, its `present` notifications and the release switch
type TimelineParts = (
    Arc<Timeline>,
    tokio::sync::mpsc::UnboundedReceiver<()>,
    std::sync::mpsc::Sender<()>,
);

impl Timeline {
    fn new(hold_first_present: bool) -> TimelineParts {
        let (entered, entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let timeline = Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            entered,
            release: Mutex::new(hold_first_present.then_some(release_rx)),
        });
        (timeline, entered_rx, release_tx)
    }

    fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

impl DeviceSelectionPresenter for Timeline {
    fn present(&self, peers: &[PeerHandle]) {
        self.record(format!("present {:?}", addresses(peers)));
        let _ = self.entered.send(());
        let release = self.release.lock().take();
        if let Some(release) = release {
            let _ = release.recv_timeout(Duration::from_millis(200));
        }
    }

    fn dismiss(&self) {
        self.record("dismiss");
    }
}

impl ChannelListener for Timeline {
    fn on_channel_established(&self, channel: EstablishedChannel) {
        self.record(format!("channel {}", channel.direction()));
    }

    fn on_peer_discovered(&self, peer: &PeerHandle) {
        self.record(format!("peer {}", peer.address));
    }
}

fn is_discovery_entry(entry: &str) -> bool {
    entry.starts_with("present") || entry.starts_with("peer")
}

/// Nothing discovery-related after `marker`, and the presenter ends dismissed
fn assert_discovery_silent_after(entries: &[String], marker: &str) {
    let at = entries
        .iter()
        .position(|e| e == marker)
        .unwrap_or_else(|| panic!("{} missing from {:?}", marker, entries));
    assert!(
        !entries[at + 1..].iter().any(|e| is_discovery_entry(e)),
        "discovery event after {}: {:?}",
        marker,
        entries
    );

    let last_presenter_call = entries
        .iter()
        .rev()
        .find(|e| e.starts_with("present") || *e == "dismiss");
    assert_eq!(
        last_presenter_call.map(String::as_str),
        Some("dismiss"),
        "{:?}",
        entries
    );
}

async fn change_role_during_present(change: fn(&RoleArbiter)) -> (RoleArbiter, Vec<String>) {
    let transport = MockTransport::new();
    let arbiter =
        RoleArbiter::with_current_runtime(Arc::new(transport.clone()), ArbiterConfig::default());
    let (timeline, mut entered, release) = Timeline::new(true);
    arbiter.set_presenter(Some(timeline.clone()));
    arbiter.set_channel_listener(Some(timeline.clone()));

    arbiter.start_discovery();
    transport.discover(peer("A", -40));
    entered.recv().await.expect("present should run");

    let changed = {
        let arbiter = arbiter.clone();
        let timeline = timeline.clone();
        tokio::task::spawn_blocking(move || {
            change(&arbiter);
            timeline.record("changed");
        })
    };
    changed.await.unwrap();
    let _ = release.send(());

    transport.discover(peer("B", -60));
    transport.finish_scan();
    tokio::time::sleep(Duration::from_millis(100)).await;

    (arbiter, timeline.entries())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_during_discovery_callback_silences_the_scan() {
    let (arbiter, entries) =
        change_role_during_present(|a| a.attempt_connect(PeerHandle::new("B"))).await;

    assert_discovery_silent_after(&entries, "changed");
    assert_eq!(arbiter.role(), Role::Connecting);
    assert!(arbiter.discovered_peers().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_discovery_callback_silences_the_scan() {
    let (arbiter, entries) = change_role_during_present(RoleArbiter::stop_discovery).await;

    assert_discovery_silent_after(&entries, "changed");
    assert_eq!(arbiter.role(), Role::Idle);
    assert!(arbiter.discovered_peers().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accepting_during_discovery_callback_silences_the_scan() {
    let (arbiter, entries) = change_role_during_present(RoleArbiter::start_accepting).await;

    assert_discovery_silent_after(&entries, "changed");
    assert_eq!(arbiter.role(), Role::Accepting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_choose_peer_racing_discovery_leaves_no_late_events() {
    for _ in 0..20 {
        let transport = MockTransport::new();
        let arbiter = RoleArbiter::with_current_runtime(
            Arc::new(transport.clone()),
            ArbiterConfig::default(),
        );
        let (timeline, mut entered, _release) = Timeline::new(false);
        arbiter.set_presenter(Some(timeline.clone()));
        arbiter.set_channel_listener(Some(timeline.clone()));

        arbiter.start_discovery();
        transport.discover(peer("A", -40));
        entered.recv().await.expect("present should run");

        let chooser = {
            let arbiter = arbiter.clone();
            let timeline = timeline.clone();
            tokio::task::spawn_blocking(move || {
                let chosen = arbiter.choose_peer(0);
                timeline.record("chosen");
                chosen
            })
        };
        transport.discover(peer("B", -65));

        let chosen = chooser.await.unwrap().unwrap();
        assert_eq!(chosen.address.as_str(), "A");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_discovery_silent_after(&timeline.entries(), "chosen");
        assert_eq!(arbiter.role(), Role::Connecting);
        assert!(arbiter.discovered_peers().is_empty());
    }
}
