//! Transport layer for the valve node
//!
//! This module provides the bus abstraction used by the node core and its
//! MQTT implementation. The core never sees MQTT packets: inbound traffic
//! arrives as [`BusEvent`]s on an mpsc channel registered with
//! [`Transport::set_event_sender`].

use tokio::sync::mpsc;

pub mod mqtt;

/// Disconnect reason code for a clean, requested disconnect
pub const NORMAL_DISCONNECT: u8 = 0;

/// Reason code reported when the connection dropped without a broker reason
pub const UNSPECIFIED_DISCONNECT: u8 = 0x80;

/// Inbound events delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// The session ended; `reason_code == 0` means a normal disconnect
    Disconnected { reason_code: u8 },
}

impl BusEvent {
    pub fn is_abnormal_disconnect(&self) -> bool {
        matches!(self, BusEvent::Disconnected { reason_code } if *reason_code != NORMAL_DISCONNECT)
    }
}

/// Transport trait for the node's bus session
///
/// Implementations are shared between the session task and the status
/// reporter, so every operation takes `&self` and does its own locking.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a fresh session with the broker; resolves once it is usable
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Close the session cleanly
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Subscribe to a single topic
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Set the sender inbound events are forwarded to
    fn set_event_sender(&self, sender: mpsc::Sender<BusEvent>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
