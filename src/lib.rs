//! valve-node - MQTT-controlled valve agent
//!
//! A small device agent that bridges an MQTT broker to a fixed set of
//! binary valves. Each valve listens on `{device_id}/valves/{name}` for an
//! integer command (`1` opens, anything else closes) and the node publishes
//! a JSON snapshot of every valve to `{device_id}/valves/status` at a fixed
//! cadence.
//!
//! # Overview
//!
//! - [`config`] - TOML/JSON configuration and validation
//! - [`actuator`] - The backend trait with sysfs GPIO and in-memory variants
//! - [`protocol`] - Topic layout and payload encodings
//! - [`transport`] - The bus abstraction and its `rumqttc` implementation
//! - [`node`] - Session lifecycle, command handling and status reporting
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use valve_node::actuator::{ActuatorBackend, SimulatedBackend};
//! use valve_node::config::NodeConfig;
//! use valve_node::node::ValveController;
//! use valve_node::testing::MockTransport;
//!
//! # tokio_test::block_on(async {
//! let config = NodeConfig::from_toml_str(r#"
//!     device_id = "dev1"
//!     valves = [{ name = "A", pin = 1 }, { name = "B", pin = 2 }]
//!
//!     [mqtt]
//!     broker_host = "localhost"
//!
//!     [backend]
//!     kind = "simulated"
//! "#).unwrap();
//!
//! let backend: Arc<dyn ActuatorBackend> = Arc::new(SimulatedBackend::new());
//! let mut node = ValveController::initialize(config, backend, MockTransport::new()).unwrap();
//! node.run_until(async {}).await.unwrap();
//! # });
//! ```

pub mod actuator;
pub mod config;
pub mod error;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use actuator::{ActuatorBackend, BackendError, Level, SimulatedBackend, SysfsGpioBackend};
pub use config::{ConfigError, NodeConfig, ValveSpec};
pub use error::{NodeError, NodeResult};
pub use node::{ConnectionState, ValveController};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
