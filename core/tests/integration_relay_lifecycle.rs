// Integration test: relay lifecycle against the loopback radio
//
// Covers the consumer-facing contract of RelayFacade:
// - parameter updates are validated and rejected atomically
// - mode changes restart exactly the implied roles
// - filter-only changes restart advertising and leave scanning alone
// - relay_data rejects empty input and uses the committed key
// - discovered devices and received payloads reach the listener

use blerelay_core::{
    ActiveMode, ConnectionStatus, DiscoveredDevice, LinkEvent, LoopbackRadio, ModeStateMachine,
    ParameterChange, ParameterValidator, RadioEvent, RadioServiceConnection, RecordedCommand,
    RelayConfig, RelayFacade, RelayListener, RelayMode, StaticEnvironment, StatusCode,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const KEY: &str = "12345678";

fn relay_with(radio: &LoopbackRadio, env: StaticEnvironment) -> RelayFacade {
    RelayFacade::new(Arc::new(radio.clone()), Arc::new(env), RelayConfig::default())
        .expect("default config is valid")
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn bound_relay(radio: &LoopbackRadio) -> RelayFacade {
    let relay = relay_with(radio, StaticEnvironment::ready());
    assert_eq!(relay.init(), StatusCode::Success);
    wait_until(|| relay.connection_status() == ConnectionStatus::Bound).await;
    relay
}

/// Forwards every callback onto a channel the test can await
struct ChannelListener {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

impl RelayListener for ChannelListener {
    fn on_payload(&self, payload: Vec<u8>) {
        let _ = self.tx.send(RadioEvent::PayloadReceived(payload));
    }

    fn on_device_discovered(&self, device: DiscoveredDevice) {
        let _ = self.tx.send(RadioEvent::DeviceDiscovered(device));
    }
}

fn listen(relay: &RelayFacade) -> mpsc::UnboundedReceiver<RadioEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    relay.set_listener(Some(Arc::new(ChannelListener { tx })));
    rx
}

#[tokio::test]
async fn test_concrete_relay_scenario() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();

    let radio = LoopbackRadio::new().without_echo();
    let relay = bound_relay(&radio).await;

    assert_eq!(
        relay.update_parameters(RelayMode::Both, "", Some(KEY)),
        StatusCode::Success
    );
    relay.start();
    assert_eq!(relay.active_mode(), ActiveMode::Both);
    assert!(radio.is_scanning());
    assert!(radio.is_advertising());

    radio.clear_commands();
    assert_eq!(
        relay.update_parameters(RelayMode::PeripheralOnly, "", Some(KEY)),
        StatusCode::Success
    );
    assert_eq!(
        radio.commands(),
        vec![
            RecordedCommand::StopAdvertise,
            RecordedCommand::StopScan,
            RecordedCommand::StartAdvertise(Vec::new()),
        ]
    );
    assert!(!radio.is_scanning());
    assert!(radio.is_advertising());
    assert_eq!(relay.active_mode(), ActiveMode::AdvertisingOnly);

    radio.clear_commands();
    assert_eq!(relay.relay_data("hello"), StatusCode::Success);
    assert_eq!(
        radio.commands(),
        vec![RecordedCommand::Relay {
            payload: b"hello".to_vec(),
            key: KEY.as_bytes().to_vec(),
        }]
    );
    assert_eq!(relay.stats().relays_issued, 1);
}

#[tokio::test]
async fn test_first_update_starts_configured_roles() {
    let radio = LoopbackRadio::new();
    let relay = bound_relay(&radio).await;

    assert_eq!(
        relay.update_parameters_code(1, "scope", None),
        StatusCode::Success
    );
    assert_eq!(relay.active_mode(), ActiveMode::ScanningOnly);
    assert!(relay.is_desired_active());
    assert!(radio.is_scanning());
    assert!(!radio.is_advertising());

    let committed = relay.committed_parameters().unwrap();
    assert_eq!(committed.mode, RelayMode::CentralOnly);
    assert_eq!(committed.encryption_key(), b"blerelay");
}

#[tokio::test]
async fn test_filter_change_restarts_advertising_only() {
    let radio = LoopbackRadio::new();
    let relay = bound_relay(&radio).await;
    relay.update_parameters(RelayMode::Both, "old", Some(KEY));
    radio.clear_commands();

    assert_eq!(
        relay.update_parameters(RelayMode::Both, "new", Some(KEY)),
        StatusCode::Success
    );
    assert_eq!(
        radio.commands(),
        vec![
            RecordedCommand::StopAdvertise,
            RecordedCommand::StartAdvertise(b"new".to_vec()),
        ]
    );
    assert!(radio.is_scanning());
}

#[tokio::test]
async fn test_key_change_restarts_nothing() {
    let radio = LoopbackRadio::new().without_echo();
    let relay = bound_relay(&radio).await;
    relay.update_parameters(RelayMode::Both, "f", Some(KEY));
    radio.clear_commands();

    assert_eq!(
        relay.update_parameters(RelayMode::Both, "f", Some("another-key")),
        StatusCode::Success
    );
    assert!(radio.commands().is_empty());

    relay.relay_data("x");
    assert_eq!(
        radio.commands(),
        vec![RecordedCommand::Relay {
            payload: b"x".to_vec(),
            key: b"another-key".to_vec(),
        }]
    );
}

#[tokio::test]
async fn test_empty_relay_is_rejected() {
    let radio = LoopbackRadio::new();
    let relay = bound_relay(&radio).await;

    assert_eq!(relay.relay_data(""), StatusCode::InvalidParameter);
    assert_eq!(relay.relay_data(None), StatusCode::InvalidParameter);
    assert!(radio.commands().is_empty());
    assert_eq!(relay.stats().relays_issued, 0);
}

#[tokio::test]
async fn test_environment_failures_surface_as_status_codes() {
    let radio = LoopbackRadio::new();
    let cases = [
        (
            StaticEnvironment::ready().with_ble_support(false),
            StatusCode::UnsupportedPlatform,
        ),
        (
            StaticEnvironment::ready().with_bluetooth(false),
            StatusCode::BluetoothDisabled,
        ),
        (
            StaticEnvironment::ready().with_location(false),
            StatusCode::LocationServiceDisabled,
        ),
        (
            StaticEnvironment::ready().with_permission(false),
            StatusCode::LocationPermissionDenied,
        ),
    ];

    for (env, expected) in cases {
        let relay = relay_with(&radio, env);
        assert_eq!(
            relay.update_parameters(RelayMode::Both, "", Some(KEY)),
            expected
        );
        assert!(relay.committed_parameters().is_none());
        assert_eq!(relay.active_mode(), ActiveMode::Off);
    }
}

#[tokio::test]
async fn test_discovered_devices_and_listener_delivery() {
    let radio = LoopbackRadio::new();
    let relay = relay_with(&radio, StaticEnvironment::ready());

    // Nothing bound yet
    assert!(relay.get_discovered_devices().is_empty());

    relay.init();
    wait_until(|| relay.connection_status() == ConnectionStatus::Bound).await;
    assert!(relay.get_discovered_devices().is_empty());

    let mut events = listen(&relay);
    let device = DiscoveredDevice::new("AA:BB:CC:DD:EE:FF", Some("peer".to_string()));
    radio.inject_device(device.clone());

    let received = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(received, Some(RadioEvent::DeviceDiscovered(device.clone())));
    assert_eq!(relay.get_discovered_devices(), vec![device]);

    // Loopback echoes relayed payloads back as received
    relay.update_parameters(RelayMode::Both, "", Some(KEY));
    relay.relay_data("ping");
    let received = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(received, Some(RadioEvent::PayloadReceived(b"ping".to_vec())));

    let stats = relay.stats();
    assert_eq!(stats.devices_delivered, 1);
    assert_eq!(stats.payloads_delivered, 1);
}

#[tokio::test]
async fn test_payloads_arrive_in_order() {
    let radio = LoopbackRadio::new();
    let relay = bound_relay(&radio).await;
    let mut events = listen(&relay);

    for i in 0..20 {
        radio.inject_payload(format!("msg-{}", i).as_bytes());
    }
    for i in 0..20 {
        let received = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(
            received,
            Some(RadioEvent::PayloadReceived(format!("msg-{}", i).into_bytes()))
        );
    }
}

// ============================================================================
// Properties
// ============================================================================

fn bound_connection(radio: &LoopbackRadio) -> RadioServiceConnection {
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    let mut conn = RadioServiceConnection::new(Arc::new(radio.clone()), link_tx);
    conn.connect();
    match link_rx.try_recv() {
        Ok(LinkEvent::Bound(handle)) => assert!(conn.on_bound(handle)),
        other => panic!("expected Bound, got {:?}", other),
    }
    conn
}

fn mode_strategy() -> impl Strategy<Value = RelayMode> {
    prop_oneof![
        Just(RelayMode::CentralOnly),
        Just(RelayMode::PeripheralOnly),
        Just(RelayMode::Both),
    ]
}

proptest! {
    #[test]
    fn prop_short_key_or_long_filter_is_rejected(
        mode in mode_strategy(),
        key in "[a-z0-9]{0,7}",
        filter in "[a-z]{0,10}",
        long_filter in "[a-z]{11,24}",
    ) {
        let radio = LoopbackRadio::new();
        let relay = relay_with(&radio, StaticEnvironment::ready());
        prop_assert_eq!(relay.update_parameters(RelayMode::Both, "keep", Some(KEY)), StatusCode::Success);
        let before = relay.committed_parameters();

        prop_assert_eq!(
            relay.update_parameters(mode, &filter, Some(key.as_str())),
            StatusCode::InvalidParameter
        );
        prop_assert_eq!(
            relay.update_parameters(mode, &long_filter, Some(KEY)),
            StatusCode::InvalidParameter
        );
        prop_assert_eq!(relay.committed_parameters(), before);
        prop_assert_eq!(relay.active_mode(), ActiveMode::Both);
    }

    #[test]
    fn prop_filter_change_never_touches_scanning(
        mode in mode_strategy(),
        old in "[a-z]{0,10}",
        new in "[a-z]{0,10}",
    ) {
        prop_assume!(old != new);
        let radio = LoopbackRadio::new();
        let conn = bound_connection(&radio);
        let validator = ParameterValidator::new("defaultkey");
        let env = StaticEnvironment::ready();
        let first = validator.validate(mode.code(), &old, Some(KEY), &env).unwrap();
        let second = validator.validate(mode.code(), &new, Some(KEY), &env).unwrap();

        let mut machine = ModeStateMachine::new();
        machine.apply(&conn, ParameterChange::between(None, &first), &first);
        let scanning_before = radio.is_scanning();
        radio.clear_commands();

        let change = ParameterChange::between(Some(&first), &second);
        prop_assert_eq!(change, ParameterChange::FilterChanged);
        machine.apply(&conn, change, &second);

        prop_assert_eq!(radio.is_scanning(), scanning_before);
        for command in radio.commands() {
            prop_assert!(matches!(
                command,
                RecordedCommand::StopAdvertise | RecordedCommand::StartAdvertise(_)
            ));
        }
    }

    #[test]
    fn prop_mode_change_leaves_exactly_implied_roles(
        from in mode_strategy(),
        to in mode_strategy(),
        filter in "[a-z]{0,10}",
    ) {
        prop_assume!(from != to);
        let radio = LoopbackRadio::new();
        let conn = bound_connection(&radio);
        let validator = ParameterValidator::new("defaultkey");
        let env = StaticEnvironment::ready();
        let first = validator.validate(from.code(), &filter, None, &env).unwrap();
        let second = validator.validate(to.code(), &filter, None, &env).unwrap();

        let mut machine = ModeStateMachine::new();
        machine.apply(&conn, ParameterChange::between(None, &first), &first);
        machine.apply(&conn, ParameterChange::between(Some(&first), &second), &second);

        prop_assert_eq!(radio.is_scanning(), to.scans());
        prop_assert_eq!(radio.is_advertising(), to.advertises());
        prop_assert_eq!(machine.is_scanning(), to.scans());
        prop_assert_eq!(machine.is_advertising(), to.advertises());
    }
}
