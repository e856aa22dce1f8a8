//! Output pins through the Linux sysfs GPIO interface
//!
//! Each configured pin is resolved to a kernel line through a [`PinMap`];
//! the line lives under `{root}/gpio{line}` with `direction` and `value`
//! attribute files. Lines that are not yet exported are exported through
//! `{root}/export` during `configure` and unexported again on `release`.

use super::{ActuatorBackend, BackendError, Level, PinMap};
use crate::config::ValveSpec;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Export is asynchronous on some kernels; poll for the pin directory
const EXPORT_POLL_ATTEMPTS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
struct ClaimedPin {
    line: u32,
    exported_by_us: bool,
}

/// GPIO backend writing to sysfs attribute files
#[derive(Debug)]
pub struct SysfsGpioBackend {
    root: PathBuf,
    pins: PinMap,
    claimed: Mutex<Vec<ClaimedPin>>,
}

impl SysfsGpioBackend {
    /// Backend whose configured pins are kernel line numbers
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_pin_map(root, PinMap::default())
    }

    pub fn with_pin_map<P: AsRef<Path>>(root: P, pins: PinMap) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pins,
            claimed: Mutex::new(Vec::new()),
        }
    }

    pub fn pin_map(&self) -> PinMap {
        self.pins
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn claimed(&self) -> MutexGuard<'_, Vec<ClaimedPin>> {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pin_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    /// Kernel line driving a valve
    fn line_of(&self, valve: &ValveSpec) -> Result<u32, BackendError> {
        let pin = valve
            .pin
            .ok_or_else(|| BackendError::MissingPin(valve.name.clone()))?;
        self.pins
            .line(pin)
            .ok_or_else(|| BackendError::UnmappedPin {
                valve: valve.name.clone(),
                pin,
            })
    }

    fn write_attr(
        path: &Path,
        line: u32,
        operation: &'static str,
        contents: &str,
    ) -> Result<(), BackendError> {
        fs::write(path, contents).map_err(|source| BackendError::Io {
            line,
            operation,
            source,
        })
    }

    fn is_claimed(&self, line: u32) -> bool {
        self.claimed().iter().any(|c| c.line == line)
    }

    /// Export the line if needed; returns whether this call exported it
    fn export(&self, line: u32) -> Result<bool, BackendError> {
        let dir = self.pin_dir(line);
        if dir.exists() {
            return Ok(false);
        }

        Self::write_attr(&self.root.join("export"), line, "export", &line.to_string())?;

        for _ in 0..EXPORT_POLL_ATTEMPTS {
            if dir.exists() {
                debug!(line, "GPIO line exported");
                return Ok(true);
            }
            std::thread::sleep(EXPORT_POLL_INTERVAL);
        }

        Err(BackendError::Io {
            line,
            operation: "export",
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not appear after export", dir.display()),
            ),
        })
    }

    fn release_pin(&self, claimed: ClaimedPin) -> Result<(), BackendError> {
        let line = claimed.line;
        let dir = self.pin_dir(line);

        Self::write_attr(&dir.join("value"), line, "write value", "0")?;
        Self::write_attr(&dir.join("direction"), line, "set direction", "in")?;
        if claimed.exported_by_us {
            Self::write_attr(&self.root.join("unexport"), line, "unexport", &line.to_string())?;
        }
        Ok(())
    }
}

impl ActuatorBackend for SysfsGpioBackend {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn configure(&self, valve: &ValveSpec) -> Result<(), BackendError> {
        let line = self.line_of(valve)?;
        let exported_by_us = self.export(line)?;
        let dir = self.pin_dir(line);

        Self::write_attr(&dir.join("direction"), line, "set direction", "out")?;
        Self::write_attr(&dir.join("value"), line, "write value", "0")?;

        if !self.is_claimed(line) {
            self.claimed().push(ClaimedPin {
                line,
                exported_by_us,
            });
        }

        info!(valve = %valve.name, pin = ?valve.pin, line, "Configured GPIO output (low)");
        Ok(())
    }

    fn set_level(&self, valve: &ValveSpec, level: Level) -> Result<(), BackendError> {
        let line = self.line_of(valve)?;
        if !self.is_claimed(line) {
            return Err(BackendError::NotConfigured(valve.name.clone()));
        }
        let value = if level.is_on() { "1" } else { "0" };
        Self::write_attr(&self.pin_dir(line).join("value"), line, "write value", value)
    }

    fn get_level(&self, valve: &ValveSpec) -> Result<Level, BackendError> {
        let line = self.line_of(valve)?;
        let raw =
            fs::read_to_string(self.pin_dir(line).join("value")).map_err(|source| {
                BackendError::Io {
                    line,
                    operation: "read value",
                    source,
                }
            })?;

        match raw.trim() {
            "0" => Ok(Level::Off),
            "1" => Ok(Level::On),
            other => Err(BackendError::InvalidReading {
                line,
                value: other.to_string(),
            }),
        }
    }

    fn release(&self) -> Result<(), BackendError> {
        let claimed: Vec<ClaimedPin> = self.claimed().drain(..).collect();
        let mut first_error = None;

        for pin in claimed {
            if let Err(e) = self.release_pin(pin) {
                warn!(line = pin.line, error = %e, "Failed to release GPIO line");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
