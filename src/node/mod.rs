//! The valve node core
//!
//! One core drives every deployment variant. It is parameterized over a
//! [`Transport`](crate::transport::Transport) and an
//! [`ActuatorBackend`](crate::actuator::ActuatorBackend):
//!
//! - [`session`] keeps the bus session alive and dispatches inbound events
//! - [`command`] turns inbound messages into valve writes
//! - [`reporter`] publishes periodic status snapshots
//! - [`controller`] wires everything together and owns the shutdown path

use std::time::Duration;
use tokio::sync::watch;

pub mod command;
pub mod controller;
pub mod reporter;
pub mod session;

pub use command::{CommandError, CommandHandler, CommandOutcome, RetryPolicy};
pub use controller::{termination_signal, ValveController};
pub use reporter::{ReportError, StatusReporter};
pub use session::{ConnectionState, SessionError, SessionManager, StateTracker};

/// Resolve once shutdown has been requested or the controller went away
pub(crate) async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first
///
/// Returns true if the sleep completed, false if shutdown was requested.
pub(crate) async fn interruptible_sleep(
    shutdown_rx: &mut watch::Receiver<bool>,
    delay: Duration,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_signalled(shutdown_rx) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
