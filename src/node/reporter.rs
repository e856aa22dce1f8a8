//! Periodic status reporting
//!
//! Once the session has connected for the first time, the reporter reads
//! every valve and publishes a JSON snapshot to `{device_id}/valves/status`
//! at a fixed cadence. It never retries a publish and never stops on errors;
//! the next tick simply tries again.

use super::session::ConnectionState;
use super::shutdown_signalled;
use crate::actuator::{ActuatorBackend, BackendError, ValveBank};
use crate::protocol::{StatusSnapshot, TopicBuilder};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Status reporting errors
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to read valve '{valve}': {source}")]
    Read {
        valve: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to encode status snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to publish status: {0}")]
    Publish(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Publishes the level of every valve at a fixed interval
pub struct StatusReporter<T>
where
    T: Transport + 'static,
{
    topic: String,
    valves: Arc<ValveBank>,
    backend: Arc<dyn ActuatorBackend>,
    transport: Arc<T>,
    interval: Duration,
    publish_failing: bool,
}

impl<T> StatusReporter<T>
where
    T: Transport + 'static,
{
    pub fn new(
        device_id: &str,
        valves: Arc<ValveBank>,
        backend: Arc<dyn ActuatorBackend>,
        transport: Arc<T>,
        interval: Duration,
    ) -> Self {
        Self {
            topic: TopicBuilder::status_topic(device_id),
            valves,
            backend,
            transport,
            interval,
            publish_failing: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Read every declared valve, in declaration order
    pub fn snapshot(&self) -> Result<StatusSnapshot, ReportError> {
        let mut snapshot = StatusSnapshot::with_capacity(self.valves.len());
        for valve in self.valves.iter() {
            let level = self
                .backend
                .get_level(valve)
                .map_err(|source| ReportError::Read {
                    valve: valve.name.clone(),
                    source,
                })?;
            snapshot.push(valve.name.clone(), level);
        }
        Ok(snapshot)
    }

    /// Take and publish a single snapshot
    pub async fn publish_once(&self) -> Result<StatusSnapshot, ReportError> {
        let snapshot = self.snapshot()?;
        let payload = snapshot.to_payload()?;
        self.transport
            .publish(&self.topic, payload)
            .await
            .map_err(|e| ReportError::Publish(Box::new(e)))?;
        Ok(snapshot)
    }

    async fn tick(&mut self) {
        match self.publish_once().await {
            Ok(_) => {
                if self.publish_failing {
                    info!(topic = %self.topic, "Status publishing recovered");
                    self.publish_failing = false;
                }
            }
            Err(e @ ReportError::Publish(_)) => {
                if self.publish_failing {
                    debug!(topic = %self.topic, error = %e, "Status publish still failing");
                } else {
                    warn!(topic = %self.topic, error = %e, "Failed to publish status");
                    self.publish_failing = true;
                }
            }
            Err(e) => {
                error!(error = %e, "Skipping status report");
            }
        }
    }

    /// The reporter task
    pub async fn run(
        mut self,
        mut state_rx: watch::Receiver<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let connected = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown_rx) => false,
            state = state_rx.wait_for(|s| {
                matches!(s, ConnectionState::Connected | ConnectionState::ShutDown)
            }) => matches!(state.as_deref(), Ok(ConnectionState::Connected)),
        };
        if !connected {
            debug!("Status reporter stopped before the first connection");
            return;
        }

        info!(
            topic = %self.topic,
            interval_ms = self.interval.as_millis() as u64,
            "Starting status reports"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        debug!("Status reporter stopped");
    }
}
