#![allow(clippy::unwrap_used)]
// Session and collaborator behaviour without a reachable broker.

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tasmota_sync_core::{DeviceBus, Registry, StateValue, TransportError};
use tasmota_sync_mqtt::{BrokerConfig, MqttBus, MqttError, MqttRegistry, MqttSession, ReconnectConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn unreachable_broker() -> BrokerConfig {
    let mut config = BrokerConfig::new("127.0.0.1", 1, "tasmota-sync-test");
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    };
    config
}

fn session() -> MqttSession {
    let (session, _messages) =
        MqttSession::connect(&unreachable_broker(), CancellationToken::new()).unwrap();
    session
}

// ── Session tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_config_rejected_before_connecting() {
    let config = BrokerConfig::new("", 1883, "bridge");

    let result = MqttSession::connect(&config, CancellationToken::new());

    assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_wait_connected_times_out() {
    let session = session();

    let result = session.wait_connected(Duration::from_millis(200)).await;

    assert!(
        matches!(result, Err(MqttError::NotConnected { ref broker, .. }) if broker == "127.0.0.1:1"),
        "expected NotConnected, got: {result:?}"
    );
    assert!(!session.is_connected());
    session.shutdown();
}

#[tokio::test]
async fn test_requests_fail_after_shutdown() {
    let session = session();
    let bus = MqttBus::new(session.clone());

    session.shutdown();
    let result = bus.publish("cmnd/plug/Power", Bytes::from_static(b"1")).await;

    assert!(matches!(result, Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_closed_resolves_after_shutdown() {
    let session = session();

    session.shutdown();

    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("event loop did not exit");
}

// ── Registry tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_base_validation() {
    let session = session();

    assert!(MqttRegistry::new(session.clone(), "").is_err());
    assert!(MqttRegistry::new(session.clone(), "home/+/plug").is_err());

    let registry = MqttRegistry::new(session.clone(), "home/plug/").unwrap();
    assert_eq!(registry.base(), "home/plug");
    assert_eq!(registry.topic("power_out"), "home/plug/power_out");
    session.shutdown();
}

#[tokio::test]
async fn test_observation_without_retained_value_is_unknown() {
    let session = session();
    let registry = MqttRegistry::new(session.clone(), "home/plug")
        .unwrap()
        .with_retained_wait(Duration::from_millis(50));

    let mut observer = registry.observe_state("power_in").await.unwrap();

    assert_eq!(observer.recv().await, Some(StateValue::Unknown));
    session.shutdown();
}

#[tokio::test]
async fn test_unregistered_event_rejected() {
    let session = session();
    let registry = MqttRegistry::new(session.clone(), "home/plug").unwrap();

    let result = registry.emit_event("on_button", json!("SINGLE")).await;

    assert!(
        matches!(result, Err(TransportError::Registry { ref name, .. }) if name == "on_button"),
        "expected Registry error, got: {result:?}"
    );

    registry.register_event("on_button").await.unwrap();
    assert!(registry.emit_event("on_button", json!("SINGLE")).await.is_ok());
    session.shutdown();
}
