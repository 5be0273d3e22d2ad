//! Integration tests for the connection and audio flow.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{address, channel_pair, next_action, MockAudio, MockRadio};
use walkie_talkie::bluetooth::{ConnectionManager, ManagerConfig, Peer};
use walkie_talkie::session::SessionContext;
use walkie_talkie::{Action, ActionBus, SessionState, WalkieMode, WalkieTalkie};

fn session(radio: &Arc<MockRadio>) -> (Arc<SessionContext>, Arc<ConnectionManager>) {
    let context = SessionContext::new(ActionBus::with_capacity(32));
    let manager = ConnectionManager::new(radio.clone(), context.clone(), ManagerConfig::default());
    (context, manager)
}

async fn wait_for_state(walkie: &WalkieTalkie, check: impl Fn(&SessionState) -> bool) {
    let mut states = walkie.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check(&states.borrow_and_update()) {
                return;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("state not reached");
}

#[tokio::test]
async fn test_discovery_reports_bonded_then_found() {
    let radio = MockRadio::new();
    radio.bonded.lock().push(Peer::new(address(1)).with_name("Pixel").bonded());
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();

    radio.find(Peer::new(address(2)).with_name("Galaxy"));
    manager.start_discovery().await;

    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStarted));
    match next_action(&mut actions).await {
        Action::DeviceDiscovered(peer) => {
            assert_eq!(peer.address, address(1));
            assert!(peer.is_bonded());
        }
        other => panic!("unexpected {:?}", other),
    }
    match next_action(&mut actions).await {
        Action::DeviceDiscovered(peer) => assert_eq!(peer.address, address(2)),
        other => panic!("unexpected {:?}", other),
    }

    manager.stop_discovery();
    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStopped));

    // Stopping again still reports the stop.
    manager.stop_discovery();
    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStopped));
}

#[tokio::test]
async fn test_discovery_dedups_in_state() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let walkie = WalkieTalkie::new(context, MockAudio::new(8));
    let _reducer = walkie.spawn();

    manager.start_discovery().await;
    radio.find(Peer::new(address(3)));
    radio.find(Peer::new(address(4)).with_name("Old"));
    radio.find(Peer::new(address(4)).with_name("New"));

    wait_for_state(&walkie, |state| {
        state
            .devices()
            .iter()
            .any(|p| p.name.as_deref() == Some("New"))
    })
    .await;

    let state = walkie.state();
    let devices = state.devices();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[1].address, address(4));
}

#[tokio::test]
async fn test_discovery_error_returns_to_idle() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let walkie = WalkieTalkie::new(context.clone(), MockAudio::new(8));
    let _reducer = walkie.spawn();

    manager.start_discovery().await;
    radio.find(Peer::new(address(5)));
    wait_for_state(&walkie, |state| state.devices().len() == 1).await;

    radio.fail_discovery.store(true, Ordering::SeqCst);
    let mut actions = context.bus().subscribe();
    manager.start_discovery().await;

    match next_action(&mut actions).await {
        Action::Error { message, cause } => {
            assert_eq!(message, "Discovery not started");
            assert!(cause.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    wait_for_state(&walkie, SessionState::is_idle).await;
}

#[tokio::test]
async fn test_connect_failure_reports_error() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();

    manager.connect(Peer::new(address(6)));

    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStopped));
    match next_action(&mut actions).await {
        Action::Error { message, .. } => assert_eq!(message, "Connection failed"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(radio.connect_attempts.load(Ordering::SeqCst), 1);
    assert!(!context.socket().is_connected());
}

#[tokio::test]
async fn test_connect_installs_socket() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();
    let (local, _remote) = channel_pair();
    radio.accept_outbound(local);

    manager.connect(Peer::new(address(7)).with_name("Pixel"));

    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStopped));
    match next_action(&mut actions).await {
        Action::DeviceConnected(peer) => assert_eq!(peer.address, address(7)),
        other => panic!("unexpected {:?}", other),
    }
    let socket = context.socket().get().unwrap();
    assert_eq!(socket.peer().name.as_deref(), Some("Pixel"));
}

#[tokio::test(start_paused = true)]
async fn test_listen_times_out() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();

    manager.listen();

    assert!(matches!(next_action(&mut actions).await, Action::ListenForConnections));
    let started = tokio::time::Instant::now();
    match next_action(&mut actions).await {
        Action::Error { message, .. } => assert_eq!(message, "Listen timeout"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(10_000));
    assert!(!context.socket().is_connected());
}

#[tokio::test]
async fn test_listen_accepts_and_ranges() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();

    manager.listen_for_connection(Duration::from_secs(5));
    assert!(matches!(next_action(&mut actions).await, Action::ListenForConnections));

    let (local, _remote) = channel_pair();
    radio.incoming(local, Peer::new(address(8)));
    match next_action(&mut actions).await {
        Action::DeviceConnected(peer) => assert_eq!(peer.address, address(8)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(context.socket().is_connected());

    wait_until(|| radio.advertising() == 1).await;

    // Readings from other devices are ignored.
    radio.rssi(address(9), -40);
    for _ in 0..5 {
        radio.rssi(address(8), -69);
    }
    match next_action(&mut actions).await {
        Action::DistanceChanged(distance) => assert_eq!(distance, 1.0),
        other => panic!("unexpected {:?}", other),
    }

    manager.disconnect().await;
    assert!(matches!(next_action(&mut actions).await, Action::DeviceDisconnected));
    assert_eq!(radio.advertising(), 0);
}

#[tokio::test]
async fn test_disconnect_twice() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let mut actions = context.bus().subscribe();
    let (local, _remote) = channel_pair();
    radio.accept_outbound(local);

    manager.connect(Peer::new(address(10)));
    assert!(matches!(next_action(&mut actions).await, Action::DiscoveryStopped));
    assert!(matches!(next_action(&mut actions).await, Action::DeviceConnected(_)));
    let socket = context.socket().get().unwrap();

    manager.disconnect().await;
    assert!(context.socket().get().is_none());
    assert!(socket.is_closed());
    assert!(matches!(next_action(&mut actions).await, Action::DeviceDisconnected));

    manager.disconnect().await;
    assert!(context.socket().get().is_none());
    assert!(actions.try_recv().is_none());
}

#[tokio::test]
async fn test_reconnect_keeps_new_session() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let walkie = WalkieTalkie::new(context.clone(), MockAudio::new(8));
    let _reducer = walkie.spawn();
    let mut actions = context.bus().subscribe();

    let (first, _first_remote) = channel_pair();
    radio.accept_outbound(first);
    manager.connect(Peer::new(address(11)));
    wait_for_state(&walkie, SessionState::is_connected).await;
    // Playback is now parked on the first socket.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (second, _second_remote) = channel_pair();
    radio.accept_outbound(second);
    manager.connect(Peer::new(address(12)));

    let mut connected = 0;
    while connected < 2 {
        if let Action::DeviceConnected(_) = next_action(&mut actions).await {
            connected += 1;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(walkie.state().is_connected());
    assert_eq!(context.socket().get().unwrap().peer().address, address(12));
    while let Some(action) = actions.try_recv() {
        assert!(!matches!(action, Action::Error { .. }), "unexpected {:?}", action);
    }
}

#[tokio::test]
async fn test_disconnect_is_not_an_error() {
    let radio = MockRadio::new();
    let (context, manager) = session(&radio);
    let walkie = WalkieTalkie::new(context.clone(), MockAudio::new(8));
    let _reducer = walkie.spawn();
    let mut actions = context.bus().subscribe();

    let (local, _remote) = channel_pair();
    radio.accept_outbound(local);
    manager.connect(Peer::new(address(13)));
    wait_for_state(&walkie, SessionState::is_connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.disconnect().await;
    loop {
        if let Action::DeviceDisconnected = next_action(&mut actions).await {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(actions.try_recv().is_none());
    assert!(walkie.state().is_idle());
}

#[tokio::test]
async fn test_voice_round_trip() {
    let radio_a = MockRadio::new();
    let radio_b = MockRadio::new();
    let (context_a, manager_a) = session(&radio_a);
    let (context_b, manager_b) = session(&radio_b);
    let audio_a = MockAudio::new(6);
    let audio_b = MockAudio::new(6);
    let walkie_a = WalkieTalkie::new(context_a, audio_a.clone());
    let walkie_b = WalkieTalkie::new(context_b, audio_b.clone());
    let _reducer_a = walkie_a.spawn();
    let _reducer_b = walkie_b.spawn();

    let (end_a, end_b) = channel_pair();
    radio_a.accept_outbound(end_a);
    radio_b.incoming(end_b, Peer::new(address(0xA)));

    manager_b.listen();
    manager_a.connect(Peer::new(address(0xB)));
    wait_for_state(&walkie_a, SessionState::is_connected).await;
    wait_for_state(&walkie_b, SessionState::is_connected).await;

    // Even-sized chunks so no read on the far side is ever a lone byte.
    let chunks: Vec<Vec<u8>> = vec![
        vec![0x01, 0x00, 0xFF, 0x7F],
        vec![0x00, 0x80, 0x10, 0x20, 0x30, 0x40],
        vec![0x02, 0x00],
        vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
    ];
    let expected: Vec<u8> = chunks.concat();
    audio_a.speak(chunks);

    assert!(walkie_a.start_speaking());
    assert_eq!(walkie_a.state().mode(), Some(WalkieMode::Speaking));

    wait_until(|| audio_b.played().len() >= expected.len()).await;
    assert_eq!(audio_b.played(), expected);
    assert!(audio_a.played().is_empty());
}

async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
