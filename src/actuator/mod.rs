//! Actuator backends for the valve node
//!
//! The node core never touches hardware directly. Everything goes through
//! [`ActuatorBackend`], which has two implementations:
//!
//! - [`SimulatedBackend`] keeps valve levels in memory and never fails
//! - [`SysfsGpioBackend`] drives output pins through the Linux sysfs GPIO tree
//!
//! Backends are shared between the command path (writes) and the status
//! reporter (reads), so every implementation must be `Send + Sync` and do its
//! own locking. All operations are single-valve.

use crate::config::ValveSpec;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod header;
pub mod simulated;
pub mod sysfs;

pub use header::{PinMap, PinNumbering};
pub use simulated::SimulatedBackend;
pub use sysfs::SysfsGpioBackend;

/// Binary valve level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Off,
    On,
}

impl Level {
    /// Map a numeric command onto a level: only `1` opens a valve
    pub fn from_command(value: i64) -> Self {
        if value == 1 {
            Level::On
        } else {
            Level::Off
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Level::Off => 0,
            Level::On => 1,
        }
    }

    pub fn is_on(self) -> bool {
        self == Level::On
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Errors raised by actuator backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Valve '{0}' has not been configured")]
    NotConfigured(String),

    #[error("Valve '{0}' has no hardware pin assigned")]
    MissingPin(String),

    #[error("Valve '{valve}': pin {pin} is not a GPIO pin")]
    UnmappedPin { valve: String, pin: u32 },

    #[error("GPIO line {line}: {operation} failed: {source}")]
    Io {
        line: u32,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO line {line} reported unexpected value '{value}'")]
    InvalidReading { line: u32, value: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Capability interface over the physical or simulated valves
pub trait ActuatorBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Prepare a valve for output and drive it to [`Level::Off`]
    fn configure(&self, valve: &ValveSpec) -> Result<(), BackendError>;

    /// Drive a valve to the given level
    fn set_level(&self, valve: &ValveSpec, level: Level) -> Result<(), BackendError>;

    /// Read back the current level of a valve
    fn get_level(&self, valve: &ValveSpec) -> Result<Level, BackendError>;

    /// Release every resource acquired by `configure`
    fn release(&self) -> Result<(), BackendError>;
}

/// The fixed, ordered set of valves declared in configuration
#[derive(Debug, Clone, Default)]
pub struct ValveBank {
    valves: Vec<ValveSpec>,
    index: HashMap<String, usize>,
}

impl ValveBank {
    /// Build a bank from validated specs; later duplicates are ignored
    pub fn new(valves: Vec<ValveSpec>) -> Self {
        let mut index = HashMap::with_capacity(valves.len());
        let mut unique = Vec::with_capacity(valves.len());
        for valve in valves {
            if index.contains_key(&valve.name) {
                continue;
            }
            index.insert(valve.name.clone(), unique.len());
            unique.push(valve);
        }
        Self {
            valves: unique,
            index,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValveSpec> {
        self.index.get(name).map(|&i| &self.valves[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValveSpec> {
        self.valves.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.valves.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.valves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valves.is_empty()
    }
}
