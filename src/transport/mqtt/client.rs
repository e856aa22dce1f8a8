//! Impure I/O operations for the MQTT client
//!
//! Each call to [`MqttClient::connect`] builds a fresh `rumqttc` client and
//! event loop, waits for the broker's ConnAck and then hands the event loop
//! to a pump task. The pump forwards inbound publishes and the end of the
//! session as [`BusEvent`]s and stops at the first disconnect or error;
//! reconnecting is the caller's decision, never the pump's.

use super::connection::{configure_mqtt_options, qos_level, MqttError, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{BusEvent, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bound on waiting for the pump after a disconnect request
const PUMP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type SharedSender = Arc<StdMutex<Option<mpsc::Sender<BusEvent>>>>;

/// MQTT transport client for the valve node
pub struct MqttClient {
    device_id: String,
    config: MqttSection,
    qos: QoS,
    connect_timeout: Duration,
    client: Mutex<Option<AsyncClient>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    event_sender: SharedSender,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl MqttClient {
    pub fn new(
        device_id: &str,
        config: MqttSection,
        connect_timeout: Duration,
    ) -> Result<Self, MqttError> {
        let qos = qos_level(config.qos)?;

        Ok(MqttClient {
            device_id: device_id.to_string(),
            config,
            qos,
            connect_timeout,
            client: Mutex::new(None),
            pump_handle: Mutex::new(None),
            event_sender: Arc::new(StdMutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Poll the fresh event loop until the broker acknowledges the session
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), MqttError> {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    if let EventRoute::ConnectionAcknowledged =
                        MessageHandler::route_mqtt_event(&event)
                    {
                        return Ok(());
                    }
                    debug!(target: "mqtt_transport", "Pre-ConnAck event: {:?}", event);
                }
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(MqttError::ConnectionRefused(format!("{code:?}")));
                }
                Err(e) => return Err(MqttError::ConnectionFailed(Box::new(e))),
            }
        }
    }

    fn current_sender(sender: &SharedSender) -> Option<mpsc::Sender<BusEvent>> {
        sender.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn forward(sender: &SharedSender, event: BusEvent) {
        match Self::current_sender(sender) {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!(target: "mqtt_transport", "Event receiver dropped, discarding event");
                }
            }
            None => {
                warn!("Received MQTT event but no event sender configured - event dropped");
            }
        }
    }

    /// Drive the event loop of one session until it ends
    async fn pump(
        mut event_loop: EventLoop,
        sender: SharedSender,
        connected: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    match &route {
                        EventRoute::MessageReceived { topic, retain, .. } => {
                            debug!(target: "mqtt_transport", topic = %topic, retain, "Received MQTT message");
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                            debug!(target: "mqtt_transport", packet_id, filters, "Subscription confirmed");
                        }
                        EventRoute::InfrastructureEvent(event_str) => {
                            debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                        }
                        _ => {}
                    }

                    if let Some(bus_event) = MessageHandler::bus_event(&route) {
                        if route.ends_session() {
                            connected.store(false, Ordering::SeqCst);
                        }
                        Self::forward(&sender, bus_event).await;
                    }

                    if route.ends_session() {
                        break;
                    }
                }
                Err(e) => {
                    let was_closing = closing.load(Ordering::SeqCst);
                    let reason_code = MessageHandler::disconnect_reason(&e, was_closing);
                    connected.store(false, Ordering::SeqCst);
                    if !was_closing {
                        error!(error = %e, "MQTT event loop error");
                    }
                    Self::forward(&sender, BusEvent::Disconnected { reason_code }).await;
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event pump stopped");
    }

    /// Stop a pump left over from a previous session
    async fn stop_stale_pump(&self) {
        if let Some(handle) = self.pump_handle.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), Self::Error> {
        self.stop_stale_pump().await;
        self.connected.store(false, Ordering::SeqCst);
        self.closing.store(false, Ordering::SeqCst);

        let mqtt_options = configure_mqtt_options(&self.device_id, &self.config);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        debug!(
            host = %self.config.broker_host,
            port = self.config.broker_port,
            "Connecting to MQTT broker"
        );

        tokio::time::timeout(self.connect_timeout, Self::wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| MqttError::ConnectTimeout(self.connect_timeout))??;

        *self.client.lock().await = Some(client);
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(Self::pump(
            event_loop,
            self.event_sender.clone(),
            self.connected.clone(),
            self.closing.clone(),
        ));
        *self.pump_handle.lock().await = Some(handle);

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.closing.store(true, Ordering::SeqCst);

        let client = self.client.lock().await.take();
        let result = match client {
            Some(client) if self.connected.load(Ordering::SeqCst) => client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e))),
            _ => Ok(()),
        };
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut handle) = self.pump_handle.lock().await.take() {
            match tokio::time::timeout(PUMP_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("Event pump shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event pump ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event pump didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
            }
        }

        info!("MQTT client disconnected");
        result
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;
        client
            .subscribe(topic.to_string(), self.qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;
        client
            .publish(topic.to_string(), self.qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_event_sender(&self, sender: mpsc::Sender<BusEvent>) {
        *self.event_sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pump_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttSection {
        MqttSection {
            broker_host: "127.0.0.1".to_string(),
            // Nothing listens on the discard port
            broker_port: 9,
            username: None,
            password: None,
            password_env: None,
            keep_alive_secs: 60,
            tls: false,
            qos: 1,
        }
    }

    #[test]
    fn test_new_rejects_invalid_qos() {
        let mut config = test_config();
        config.qos = 5;
        assert!(matches!(
            MqttClient::new("dev1", config, Duration::from_secs(1)),
            Err(MqttError::InvalidQos(5))
        ));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let client = MqttClient::new("dev1", test_config(), Duration::from_secs(1)).unwrap();
        assert!(!client.is_connected());

        let result = client.publish("dev1/valves/status", b"{}".to_vec()).await;
        assert!(matches!(result, Err(MqttError::NotConnected)));

        let result = client.subscribe("dev1/valves/A").await;
        assert!(matches!(result, Err(MqttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let client = MqttClient::new("dev1", test_config(), Duration::from_secs(2)).unwrap();
        let result = client.connect().await;
        assert!(result.is_err());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_ok() {
        let client = MqttClient::new("dev1", test_config(), Duration::from_secs(1)).unwrap();
        assert!(client.disconnect().await.is_ok());
        // Repeated disconnects stay harmless
        assert!(client.disconnect().await.is_ok());
    }
}
