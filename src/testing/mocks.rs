//! Mock implementations for testing
//!
//! Provides a scripted [`Transport`], a failure-injecting actuator backend
//! and a log capture layer, so the node core can be exercised without a
//! broker or hardware.

use crate::actuator::{ActuatorBackend, BackendError, Level, SimulatedBackend};
use crate::config::ValveSpec;
use crate::error::NodeError;
use crate::transport::{BusEvent, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level as TraceLevel, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub type PublishedMessage = (String, Vec<u8>);

/// Take one unit from a failure budget; true if a failure should be injected
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    failing_subscriptions: Mutex<Vec<String>>,
    connect_failures: AtomicU32,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    connected: AtomicBool,
    fail_publish: AtomicBool,
    event_sender: StdMutex<Option<mpsc::Sender<BusEvent>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `failures` connection attempts
    pub fn with_connect_failures(failures: u32) -> Self {
        Self {
            connect_failures: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub async fn fail_subscribe_to(&self, topic: &str) {
        self.failing_subscriptions
            .lock()
            .await
            .push(topic.to_string());
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.subscriptions.lock().await.clear();
        self.published_messages.lock().await.clear();
    }

    fn sender(&self) -> Option<mpsc::Sender<BusEvent>> {
        self.event_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliver an event as if it came from the broker; false if nobody listens
    pub async fn inject(&self, event: BusEvent) -> bool {
        match self.sender() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver an inbound message
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.inject(BusEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    /// Drop the session with the given reason code
    pub async fn drop_connection(&self, reason_code: u8) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.inject(BusEvent::Disconnected { reason_code }).await
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = NodeError;

    async fn connect(&self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if consume(&self.connect_failures) {
            return Err(NodeError::internal("Mock connection failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(NodeError::internal("Mock transport not connected"));
        }
        if self
            .failing_subscriptions
            .lock()
            .await
            .iter()
            .any(|t| t == topic)
        {
            return Err(NodeError::internal("Mock subscribe failure"));
        }
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if !self.is_connected() || self.fail_publish.load(Ordering::SeqCst) {
            return Err(NodeError::internal("Mock publish failure"));
        }
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_event_sender(&self, sender: mpsc::Sender<BusEvent>) {
        *self.event_sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }
}

/// Simulated backend with injectable failures
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: SimulatedBackend,
    failing_valve: Option<String>,
    write_failures: AtomicU32,
    write_calls: AtomicU32,
    fail_reads: AtomicBool,
    fail_configure: AtomicBool,
}

impl FlakyBackend {
    /// Fail the first `write_failures` writes
    pub fn new(write_failures: u32) -> Self {
        Self {
            write_failures: AtomicU32::new(write_failures),
            ..Default::default()
        }
    }

    /// Fail the first `write_failures` writes to `valve` only
    pub fn failing_valve(valve: &str, write_failures: u32) -> Self {
        Self {
            failing_valve: Some(valve.to_string()),
            ..Self::new(write_failures)
        }
    }

    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    pub fn level_of(&self, name: &str) -> Option<Level> {
        self.inner.snapshot().get(name).copied()
    }
}

impl ActuatorBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn configure(&self, valve: &ValveSpec) -> Result<(), BackendError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(BackendError::WriteFailed(format!(
                "injected configure failure for '{}'",
                valve.name
            )));
        }
        self.inner.configure(valve)
    }

    fn set_level(&self, valve: &ValveSpec, level: Level) -> Result<(), BackendError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let targeted = self
            .failing_valve
            .as_deref()
            .map_or(true, |name| name == valve.name);
        if targeted && consume(&self.write_failures) {
            return Err(BackendError::WriteFailed("injected write failure".to_string()));
        }
        self.inner.set_level(valve, level)
    }

    fn get_level(&self, valve: &ValveSpec) -> Result<Level, BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::ReadFailed("injected read failure".to_string()));
        }
        self.inner.get_level(valve)
    }

    fn release(&self) -> Result<(), BackendError> {
        self.inner.release()
    }
}

/// One event recorded by [`LogCapture`]
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: TraceLevel,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Tracing layer that records every event for assertions
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<StdMutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture events on the current thread until the guard is dropped
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of events at `level` whose message contains `needle`
    pub fn count(&self, level: TraceLevel, needle: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .count()
    }

    pub fn contains(&self, level: TraceLevel, needle: &str) -> bool {
        self.count(level, needle) > 0
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CapturedEvent {
                level: *event.metadata().level(),
                message: visitor.message,
                fields: visitor.fields,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_records_traffic() {
        let transport = MockTransport::new();
        assert!(transport.publish("t", vec![1]).await.is_err());

        transport.connect().await.unwrap();
        transport.subscribe("dev1/valves/A").await.unwrap();
        transport.publish("dev1/valves/status", b"{}".to_vec()).await.unwrap();

        assert_eq!(transport.subscriptions().await, vec!["dev1/valves/A"]);
        assert_eq!(transport.published().await.len(), 1);

        transport.clear_history().await;
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let transport = MockTransport::with_connect_failures(2);
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_inject_without_sender() {
        let transport = MockTransport::new();
        assert!(!transport.deliver("dev1/valves/A", b"1").await);

        let (tx, mut rx) = mpsc::channel(4);
        transport.set_event_sender(tx);
        assert!(transport.drop_connection(0x80).await);
        assert_eq!(
            rx.recv().await,
            Some(BusEvent::Disconnected { reason_code: 0x80 })
        );
    }

    #[test]
    fn test_flaky_backend_fails_first_writes() {
        let backend = FlakyBackend::new(1);
        let valve = ValveSpec::new("A", None);
        backend.configure(&valve).unwrap();

        assert!(backend.set_level(&valve, Level::On).is_err());
        assert!(backend.set_level(&valve, Level::On).is_ok());
        assert_eq!(backend.write_calls(), 2);
        assert_eq!(backend.level_of("A"), Some(Level::On));
    }

    #[test]
    fn test_flaky_backend_can_target_one_valve() {
        let backend = FlakyBackend::failing_valve("B", u32::MAX);
        let a = ValveSpec::new("A", None);
        let b = ValveSpec::new("B", None);
        backend.configure(&a).unwrap();
        backend.configure(&b).unwrap();

        assert!(backend.set_level(&b, Level::On).is_err());
        assert!(backend.set_level(&a, Level::On).is_ok());
        assert_eq!(backend.level_of("B"), Some(Level::Off));
    }

    #[test]
    fn test_log_capture_records_message_and_fields() {
        let capture = LogCapture::new();
        {
            let _guard = capture.install();
            tracing::warn!(valve = "A", attempt = 2, "Error setting valve state");
        }
        tracing::warn!("not captured");

        let events = capture.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Error setting valve state");
        assert_eq!(events[0].fields["valve"], "A");
        assert_eq!(events[0].fields["attempt"], "2");
        assert!(capture.contains(TraceLevel::WARN, "valve state"));
    }
}
