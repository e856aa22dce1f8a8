//! Status reporting through the public API

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Level as TraceLevel;
use valve_node::actuator::{ActuatorBackend, Level, SimulatedBackend, ValveBank};
use valve_node::config::ValveSpec;
use valve_node::node::{ConnectionState, StateTracker, StatusReporter};
use valve_node::testing::{FlakyBackend, LogCapture, MockTransport};
use valve_node::transport::Transport;

fn bank(names: &[&str]) -> Arc<ValveBank> {
    Arc::new(ValveBank::new(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ValveSpec::new(*name, Some(i as u32 + 1)))
            .collect(),
    ))
}

async fn connected() -> Arc<MockTransport> {
    let transport = Arc::new(MockTransport::new());
    transport.connect().await.unwrap();
    transport
}

#[tokio::test]
async fn test_snapshot_follows_declaration_order() {
    let valves = bank(&["zone-3", "A", "m"]);
    let backend = Arc::new(SimulatedBackend::new());
    for valve in valves.iter() {
        backend.configure(valve).unwrap();
    }
    backend
        .set_level(&ValveSpec::new("m", Some(3)), Level::On)
        .unwrap();
    let transport = connected().await;
    let reporter = StatusReporter::new(
        "dev1",
        valves,
        backend,
        transport.clone(),
        Duration::from_millis(200),
    );

    reporter.publish_once().await.unwrap();

    let published = transport.published().await;
    assert_eq!(reporter.topic(), "dev1/valves/status");
    assert_eq!(
        String::from_utf8(published[0].1.clone()).unwrap(),
        r#"{"zone-3":0,"A":0,"m":1}"#
    );
}

#[tokio::test]
async fn test_empty_valve_list_publishes_empty_object() {
    let transport = connected().await;
    let reporter = StatusReporter::new(
        "dev1",
        bank(&[]),
        Arc::new(SimulatedBackend::new()),
        transport.clone(),
        Duration::from_millis(200),
    );

    reporter.publish_once().await.unwrap();

    assert_eq!(transport.published().await[0].1, b"{}".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_publish_failures_are_not_retried_and_warn_once() {
    let capture = LogCapture::new();
    let _guard = capture.install();

    let valves = bank(&["A"]);
    let backend = Arc::new(SimulatedBackend::new());
    for valve in valves.iter() {
        backend.configure(valve).unwrap();
    }
    let transport = connected().await;
    transport.set_fail_publish(true);
    let state = StateTracker::new();
    state.set(ConnectionState::Connected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = StatusReporter::new(
        "dev1",
        valves,
        backend,
        transport.clone(),
        Duration::from_millis(200),
    );
    let handle = tokio::spawn(reporter.run(state.subscribe(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(1010)).await;
    transport.set_fail_publish(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send_replace(true);
    handle.await.unwrap();

    assert_eq!(capture.count(TraceLevel::WARN, "Failed to publish status"), 1);
    assert!(capture.contains(TraceLevel::INFO, "Status publishing recovered"));
    assert_eq!(transport.published().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_skips_tick_and_keeps_running() {
    let valves = bank(&["A", "B"]);
    let backend = Arc::new(FlakyBackend::new(0));
    for valve in valves.iter() {
        backend.configure(valve).unwrap();
    }
    backend.set_fail_reads(true);
    let transport = connected().await;
    let state = StateTracker::new();
    state.set(ConnectionState::Connected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = StatusReporter::new(
        "dev1",
        valves,
        backend.clone(),
        transport.clone(),
        Duration::from_millis(200),
    );
    let handle = tokio::spawn(reporter.run(state.subscribe(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(transport.published().await.is_empty());

    backend.set_fail_reads(false);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!transport.published().await.is_empty());

    shutdown_tx.send_replace(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reporting_continues_across_disconnects() {
    let valves = bank(&["A"]);
    let backend = Arc::new(SimulatedBackend::new());
    for valve in valves.iter() {
        backend.configure(valve).unwrap();
    }
    let transport = connected().await;
    let state = StateTracker::new();
    state.set(ConnectionState::Connected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = StatusReporter::new(
        "dev1",
        valves,
        backend,
        transport.clone(),
        Duration::from_millis(200),
    );
    let handle = tokio::spawn(reporter.run(state.subscribe(), shutdown_rx));
    tokio::time::sleep(Duration::from_millis(10)).await;

    state.set(ConnectionState::Disconnected);
    transport.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let before = transport.published().await.len();

    transport.connect().await.unwrap();
    state.set(ConnectionState::Connected);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(transport.published().await.len() > before);
    assert!(!handle.is_finished());

    shutdown_tx.send_replace(true);
    handle.await.unwrap();
}
