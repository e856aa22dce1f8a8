//! Bus session lifecycle
//!
//! The session manager owns the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connecting   --failure-->     Disconnected   (after the fixed reconnect delay)
//! Connected    --abnormal drop-> Disconnected  (fresh connect cycle)
//! any state    --shutdown-->    ShutDown       (terminal)
//! ```
//!
//! It runs as a single task: the initial connect cycle, then inbound events
//! one at a time. Commands are applied inline, so they are handled in the
//! order the broker delivered them, and a reconnect (including its
//! subscriptions) completes before the next event is looked at.

use super::command::CommandHandler;
use super::{interruptible_sleep, shutdown_signalled};
use crate::actuator::ValveBank;
use crate::protocol::TopicBuilder;
use crate::transport::{BusEvent, Transport, NORMAL_DISCONNECT};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Connection state of the bus session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: no further connection attempts
    ShutDown,
}

/// Session errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Shutdown requested")]
    ShutdownRequested,
}

/// Shared, observable connection state
///
/// Cheap to clone; every clone publishes into the same watch channel.
/// Once `ShutDown` is reached the state never changes again.
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    /// Move to `next`; returns false if nothing changed
    pub fn set(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == ConnectionState::ShutDown || *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "Connection state change");
            *current = next;
            true
        })
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Keeps the bus session alive and dispatches inbound events
pub struct SessionManager<T>
where
    T: Transport + 'static,
{
    device_id: String,
    valves: Arc<ValveBank>,
    transport: Arc<T>,
    commands: Arc<CommandHandler>,
    reconnect_delay: Duration,
    state: StateTracker,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T> SessionManager<T>
where
    T: Transport + 'static,
{
    pub fn new(
        device_id: impl Into<String>,
        valves: Arc<ValveBank>,
        transport: Arc<T>,
        commands: Arc<CommandHandler>,
        state: StateTracker,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            valves,
            transport,
            commands,
            reconnect_delay: Duration::from_secs(5),
            state,
            shutdown_rx,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect, retrying indefinitely with the fixed reconnect delay
    pub async fn connect_with_retry(&self) -> Result<(), SessionError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut attempt: u64 = 0;

        loop {
            if *shutdown_rx.borrow() {
                return Err(SessionError::ShutdownRequested);
            }

            attempt += 1;
            self.state.set(ConnectionState::Connecting);

            let result = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => {
                    info!("Shutdown requested during connection attempt");
                    return Err(SessionError::ShutdownRequested);
                }
                result = self.transport.connect() => result,
            };

            match result {
                Ok(()) => {
                    self.state.set(ConnectionState::Connected);
                    info!(attempt, device_id = %self.device_id, "Connected to MQTT broker");
                    return Ok(());
                }
                Err(e) => {
                    self.state.set(ConnectionState::Disconnected);
                    error!(
                        attempt,
                        error = %e,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        "Connection failed"
                    );
                    if !interruptible_sleep(&mut shutdown_rx, self.reconnect_delay).await {
                        info!("Shutdown requested during reconnect delay");
                        return Err(SessionError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Subscribe to the command topic of every valve
    ///
    /// A failed subscription is logged and the remaining valves are still
    /// subscribed. Returns the number of successful subscriptions.
    pub async fn subscribe_all(&self) -> usize {
        let mut subscribed = 0;
        for name in self.valves.names() {
            let topic = TopicBuilder::command_topic(&self.device_id, name);
            match self.transport.subscribe(&topic).await {
                Ok(()) => {
                    info!(topic = %topic, "Subscribed to topic");
                    subscribed += 1;
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to subscribe to topic");
                }
            }
        }
        subscribed
    }

    /// One full connect cycle: connect with retry, then subscribe
    pub async fn establish(&self) -> Result<(), SessionError> {
        self.connect_with_retry().await?;
        self.subscribe_all().await;
        Ok(())
    }

    /// Dispatch one inbound event
    pub async fn handle_event(&self, event: BusEvent) -> Result<(), SessionError> {
        match event {
            BusEvent::Message { topic, payload } => {
                self.commands.on_message(&topic, &payload).await;
                Ok(())
            }
            BusEvent::Disconnected { reason_code } if reason_code == NORMAL_DISCONNECT => {
                self.state.set(ConnectionState::Disconnected);
                info!("Disconnected from MQTT broker");
                Ok(())
            }
            BusEvent::Disconnected { reason_code } => {
                self.state.set(ConnectionState::Disconnected);
                warn!(reason_code, "Disconnected from MQTT broker. Reconnecting...");
                self.establish().await
            }
        }
    }

    /// The session task: connect, then dispatch events until shutdown
    pub async fn run(self, mut events: mpsc::Receiver<BusEvent>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        if self.establish().await.is_err() {
            debug!("Session stopped before the first connection");
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => {
                    debug!("Session received shutdown signal");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("Event channel closed, stopping session");
                        break;
                    }
                }
            }
        }

        info!("Session stopped");
    }
}
