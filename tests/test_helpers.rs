//! Test helpers and utilities for integration tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use valve_node::actuator::{ActuatorBackend, SimulatedBackend};
use valve_node::config::{
    BackendKind, BackendSection, LoggingSection, MqttSection, NodeConfig, TimingSection, ValveSpec,
};
use valve_node::node::ValveController;
use valve_node::testing::MockTransport;

/// `dev1` with valve A on pin 1 and valve B on pin 2, simulated backend
#[allow(dead_code)]
pub fn test_config() -> NodeConfig {
    NodeConfig {
        device_id: "dev1".to_string(),
        valves: vec![ValveSpec::new("A", Some(1)), ValveSpec::new("B", Some(2))],
        mqtt: MqttSection {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            username: None,
            password: None,
            password_env: None,
            keep_alive_secs: 60,
            tls: false,
            qos: 0,
        },
        backend: BackendSection {
            kind: BackendKind::Simulated,
            ..BackendSection::default()
        },
        timing: TimingSection::default(),
        logging: LoggingSection::default(),
    }
}

/// A controller over a fresh simulated backend and the given mock transport
#[allow(dead_code)]
pub fn test_controller(
    transport: MockTransport,
) -> (ValveController<MockTransport>, Arc<SimulatedBackend>) {
    let backend = Arc::new(SimulatedBackend::new());
    let shared: Arc<dyn ActuatorBackend> = backend.clone();
    let controller = ValveController::initialize(test_config(), shared, transport).unwrap();
    (controller, backend)
}

/// Poll `check` every 10ms of (possibly paused) time until it holds
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// The most recent status payload as a JSON string
#[allow(dead_code)]
pub async fn last_status(transport: &MockTransport) -> Option<String> {
    transport
        .published()
        .await
        .into_iter()
        .filter(|(topic, _)| topic == "dev1/valves/status")
        .last()
        .map(|(_, payload)| String::from_utf8_lossy(&payload).into_owned())
}
