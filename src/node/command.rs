//! Inbound command handling
//!
//! A command is a message on `{device_id}/valves/{name}` whose payload is an
//! ASCII integer. Nothing in here ever fails the caller: every problem is
//! logged and reported back as a [`CommandOutcome`].

use crate::actuator::{ActuatorBackend, Level, ValveBank};
use crate::config::{TimingSection, ValveSpec};
use crate::protocol::{parse_command_payload, valve_name_from_topic, PayloadError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Bounded retry for valve writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Pause between consecutive attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_timing(timing: &TimingSection) -> Self {
        Self {
            attempts: timing.write_attempts.max(1),
            delay: timing.write_retry_delay(),
        }
    }
}

/// Reasons a command is dropped without touching the backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command payload: {0}")]
    InvalidPayload(#[from] PayloadError),
    #[error("Valve '{0}' not found")]
    UnknownValve(String),
}

/// What happened to one inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The valve was driven to `level`
    Applied {
        valve: String,
        level: Level,
        attempts: u32,
    },
    /// The command was dropped before any write
    Rejected(CommandError),
    /// Every write attempt failed
    Failed { valve: String, attempts: u32 },
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied { .. })
    }
}

/// Applies inbound commands to the actuator backend
pub struct CommandHandler {
    valves: Arc<ValveBank>,
    backend: Arc<dyn ActuatorBackend>,
    retry: RetryPolicy,
}

impl CommandHandler {
    pub fn new(
        valves: Arc<ValveBank>,
        backend: Arc<dyn ActuatorBackend>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            valves,
            backend,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Handle one inbound message
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> CommandOutcome {
        let name = valve_name_from_topic(topic);

        let command = match parse_command_payload(payload) {
            Ok(command) => command,
            Err(e) => {
                error!(topic = %topic, error = %e, "Invalid command payload");
                return CommandOutcome::Rejected(e.into());
            }
        };

        let Some(valve) = self.valves.get(name) else {
            error!(topic = %topic, "Valve '{}' not found", name);
            return CommandOutcome::Rejected(CommandError::UnknownValve(name.to_string()));
        };

        self.apply(valve, command.level).await
    }

    /// Drive a configured valve to `level`, retrying failed writes
    pub async fn apply(&self, valve: &ValveSpec, level: Level) -> CommandOutcome {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            match self.backend.set_level(valve, level) {
                Ok(()) => {
                    info!(valve = %valve.name, level = level.as_u8(), "Set valve state");
                    return CommandOutcome::Applied {
                        valve: valve.name.clone(),
                        level,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(
                        valve = %valve.name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Error setting valve state"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        error!(
            valve = %valve.name,
            attempts,
            "Failed to set state for valve '{}' after {} attempts", valve.name, attempts
        );
        CommandOutcome::Failed {
            valve: valve.name.clone(),
            attempts,
        }
    }
}
