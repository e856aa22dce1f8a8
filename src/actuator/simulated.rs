//! In-memory valve backend for running without hardware

use super::{ActuatorBackend, BackendError, Level};
use crate::config::ValveSpec;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Keeps one level per configured valve name; never fails once configured
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    levels: Mutex<HashMap<String, Level>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn levels(&self) -> MutexGuard<'_, HashMap<String, Level>> {
        // A panicked writer cannot leave a half-written level behind
        self.levels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current levels of all configured valves
    pub fn snapshot(&self) -> HashMap<String, Level> {
        self.levels().clone()
    }
}

impl ActuatorBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn configure(&self, valve: &ValveSpec) -> Result<(), BackendError> {
        self.levels().insert(valve.name.clone(), Level::Off);
        Ok(())
    }

    fn set_level(&self, valve: &ValveSpec, level: Level) -> Result<(), BackendError> {
        match self.levels().get_mut(&valve.name) {
            Some(current) => {
                *current = level;
                Ok(())
            }
            None => Err(BackendError::NotConfigured(valve.name.clone())),
        }
    }

    fn get_level(&self, valve: &ValveSpec) -> Result<Level, BackendError> {
        self.levels()
            .get(&valve.name)
            .copied()
            .ok_or_else(|| BackendError::NotConfigured(valve.name.clone()))
    }

    fn release(&self) -> Result<(), BackendError> {
        self.levels().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_configure_starts_off() {
        let backend = SimulatedBackend::new();
        let valve = ValveSpec::new("A", None);

        backend.configure(&valve).unwrap();

        assert_eq!(backend.get_level(&valve).unwrap(), Level::Off);
    }

    #[test]
    fn test_set_and_read_back() {
        let backend = SimulatedBackend::new();
        let valve = ValveSpec::new("A", None);
        backend.configure(&valve).unwrap();

        backend.set_level(&valve, Level::On).unwrap();
        assert_eq!(backend.get_level(&valve).unwrap(), Level::On);

        backend.set_level(&valve, Level::Off).unwrap();
        assert_eq!(backend.get_level(&valve).unwrap(), Level::Off);
    }

    #[test]
    fn test_unconfigured_valve_rejected() {
        let backend = SimulatedBackend::new();
        let valve = ValveSpec::new("ghost", None);

        assert!(matches!(
            backend.set_level(&valve, Level::On),
            Err(BackendError::NotConfigured(_))
        ));
        assert!(backend.get_level(&valve).is_err());
    }

    #[test]
    fn test_release_forgets_valves() {
        let backend = SimulatedBackend::new();
        let valve = ValveSpec::new("A", None);
        backend.configure(&valve).unwrap();

        backend.release().unwrap();

        assert!(backend.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let backend = Arc::new(SimulatedBackend::new());
        let valves: Vec<_> = (0..4)
            .map(|i| ValveSpec::new(format!("v{i}"), None))
            .collect();
        for valve in &valves {
            backend.configure(valve).unwrap();
        }

        let handles: Vec<_> = valves
            .iter()
            .cloned()
            .map(|valve| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let level = if i % 2 == 0 { Level::On } else { Level::Off };
                        backend.set_level(&valve, level).unwrap();
                        backend.get_level(&valve).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Last write of every writer was Off
        assert!(backend.snapshot().values().all(|l| *l == Level::Off));
    }
}
