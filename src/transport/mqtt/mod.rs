//! MQTT implementation of the node transport
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure option building and the transport error type
//! - [`message_handler`] - Pure routing of `rumqttc` events
//! - [`client`] - Impure I/O operations and the event-loop pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use valve_node::config::MqttSection;
//! use valve_node::transport::mqtt::MqttClient;
//! use valve_node::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_host: "localhost".to_string(),
//!     broker_port: 1883,
//!     username: None,
//!     password: None,
//!     password_env: None,
//!     keep_alive_secs: 60,
//!     tls: false,
//!     qos: 0,
//! };
//!
//! let client = MqttClient::new("dev1", config, Duration::from_secs(10))?;
//! client.connect().await?;
//! client.subscribe("dev1/valves/A").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, qos_level, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
