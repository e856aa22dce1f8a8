//! Valve node composition root
//!
//! The controller validates configuration, prepares the actuator backend,
//! wires the session manager and status reporter to the transport, and owns
//! the one shutdown path.

use super::command::{CommandHandler, RetryPolicy};
use super::reporter::StatusReporter;
use super::session::{ConnectionState, SessionManager, StateTracker};
use crate::actuator::{ActuatorBackend, ValveBank};
use crate::config::{NodeConfig, TimingSection};
use crate::error::{NodeError, NodeResult};
use crate::transport::{BusEvent, Transport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Buffered inbound events between the transport pump and the session
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bound on waiting for a task to notice shutdown before aborting it
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Device-control agent bridging the bus to the configured valves
pub struct ValveController<T>
where
    T: Transport + 'static,
{
    device_id: String,
    valves: Arc<ValveBank>,
    backend: Arc<dyn ActuatorBackend>,
    transport: Arc<T>,
    timing: TimingSection,
    state: StateTracker,
    shutdown_tx: watch::Sender<bool>,
    events_rx: Option<mpsc::Receiver<BusEvent>>,
    session_handle: Option<JoinHandle<()>>,
    reporter_handle: Option<JoinHandle<()>>,
    cleaned_up: bool,
}

impl<T> ValveController<T>
where
    T: Transport + 'static,
{
    /// Validate configuration and drive every valve to its initial Off level
    pub fn initialize(
        config: NodeConfig,
        backend: Arc<dyn ActuatorBackend>,
        transport: T,
    ) -> NodeResult<Self> {
        config.validate()?;

        info!(
            device_id = %config.device_id,
            valves = config.valves.len(),
            backend = backend.name(),
            "Initializing valve node"
        );

        if config.valves.is_empty() {
            warn!("No valves configured; only empty status reports will be published");
        }

        let valves = Arc::new(ValveBank::new(config.valves));
        for valve in valves.iter() {
            if let Err(e) = backend.configure(valve) {
                error!(valve = %valve.name, error = %e, "Failed to configure valve");
                if let Err(release_err) = backend.release() {
                    warn!(error = %release_err, "Failed to release backend after setup error");
                }
                return Err(e.into());
            }
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        transport.set_event_sender(events_tx);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            device_id: config.device_id,
            valves,
            backend,
            transport: Arc::new(transport),
            timing: config.timing,
            state: StateTracker::new(),
            shutdown_tx,
            events_rx: Some(events_rx),
            session_handle: None,
            reporter_handle: None,
            cleaned_up: false,
        })
    }

    /// Spawn the session and reporter tasks
    pub fn start(&mut self) -> NodeResult<()> {
        if self.cleaned_up {
            return Err(NodeError::internal("controller has already been shut down"));
        }
        let events_rx = self
            .events_rx
            .take()
            .ok_or_else(|| NodeError::internal("controller already started"))?;

        let commands = Arc::new(CommandHandler::new(
            self.valves.clone(),
            self.backend.clone(),
            RetryPolicy::from_timing(&self.timing),
        ));

        let session = SessionManager::new(
            self.device_id.clone(),
            self.valves.clone(),
            self.transport.clone(),
            commands,
            self.state.clone(),
            self.shutdown_tx.subscribe(),
        )
        .with_reconnect_delay(self.timing.reconnect_delay());

        let reporter = StatusReporter::new(
            &self.device_id,
            self.valves.clone(),
            self.backend.clone(),
            self.transport.clone(),
            self.timing.status_interval(),
        );

        self.session_handle = Some(tokio::spawn(session.run(events_rx)));
        self.reporter_handle = Some(tokio::spawn(
            reporter.run(self.state.subscribe(), self.shutdown_tx.subscribe()),
        ));

        info!(device_id = %self.device_id, "Valve node started");
        Ok(())
    }

    /// Run until `shutdown` resolves, then clean up
    pub async fn run_until<F>(&mut self, shutdown: F) -> NodeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.session_handle.is_none() {
            self.start()?;
        }
        shutdown.await;
        info!("Shutdown initiated");
        self.cleanup().await
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(&mut self) -> NodeResult<()> {
        self.run_until(termination_signal()).await
    }

    /// Stop everything and release the bus session and the hardware
    ///
    /// Only the first call has an effect. Safe to call when the session
    /// never connected.
    pub async fn cleanup(&mut self) -> NodeResult<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;

        self.shutdown_tx.send_replace(true);
        self.state.set(ConnectionState::ShutDown);

        if let Some(handle) = self.reporter_handle.take() {
            Self::stop_task("reporter", handle).await;
        }
        if let Some(handle) = self.session_handle.take() {
            Self::stop_task("session", handle).await;
        }

        let transport_result = self.transport.disconnect().await;
        if let Err(e) = &transport_result {
            warn!(error = %e, "Error while disconnecting from MQTT broker");
        }

        let backend_result = self.backend.release();
        if let Err(e) = &backend_result {
            error!(error = %e, "Failed to release actuator backend");
        }

        info!(device_id = %self.device_id, "Valve node shut down");

        transport_result.map_err(NodeError::transport)?;
        backend_result?;
        Ok(())
    }

    async fn stop_task(name: &str, mut handle: JoinHandle<()>) {
        match tokio::time::timeout(TASK_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if !e.is_cancelled() => error!(task = name, "Task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(task = name, "Task didn't stop in time, aborting");
                handle.abort();
            }
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn valves(&self) -> &ValveBank {
        &self.valves
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn backend(&self) -> &Arc<dyn ActuatorBackend> {
        &self.backend
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.session_handle.is_some() && !self.cleaned_up
    }
}

impl<T> Drop for ValveController<T>
where
    T: Transport + 'static,
{
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.state.set(ConnectionState::ShutDown);
        for handle in [self.reporter_handle.take(), self.session_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        if let Err(e) = self.backend.release() {
            warn!(error = %e, "Failed to release actuator backend on drop");
        }
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl-C where unix signals are unavailable)
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down gracefully..."),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
