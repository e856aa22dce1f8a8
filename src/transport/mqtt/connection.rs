//! Pure connection configuration for the MQTT client
//!
//! This module contains the error type and the pure functions that turn the
//! `[mqtt]` configuration section into `rumqttc` options.

use crate::config::MqttSection;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Capacity of the request channel between `AsyncClient` and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("No connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected to the broker")]
    NotConnected,
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
}

/// Map a configured QoS number onto the `rumqttc` level
pub fn qos_level(qos: u8) -> Result<QoS, MqttError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

/// Client identifier for one connection attempt
///
/// A fresh suffix per attempt keeps a lingering half-open session on the
/// broker from kicking the new one off.
pub fn client_id(device_id: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("valve-node-{device_id}-{timestamp}")
}

/// Build the `rumqttc` options for a new session
pub fn configure_mqtt_options(device_id: &str, config: &MqttSection) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(client_id(device_id), config.broker_host.as_str(), config.broker_port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.as_str(), password.as_str());
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    mqtt_options
}
