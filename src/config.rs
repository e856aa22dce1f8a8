//! Configuration system for the valve node
//!
//! Configuration is loaded once at startup from a TOML file (or a JSON file,
//! the format used by earlier deployments of the node) and validated before
//! any component is constructed. Everything in here is immutable afterwards.

use crate::actuator::{PinMap, PinNumbering};
use crate::protocol::STATUS_SEGMENT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main node configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Device identifier used to namespace every topic
    #[serde(default)]
    pub device_id: String,
    /// Valves controlled by this node
    #[serde(default)]
    pub valves: Vec<ValveSpec>,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// A single declared valve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ValveSpec {
    /// Unique valve name, used as the last topic segment
    pub name: String,
    /// Hardware output pin (required by the GPIO backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<u32>,
}

impl ValveSpec {
    pub fn new<S: Into<String>>(name: S, pin: Option<u32>) -> Self {
        Self {
            name: name.into(),
            pin,
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname or IP address
    #[serde(default)]
    pub broker_host: String,
    /// Broker port (default: 1883)
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Environment variable containing the password, takes precedence over `password`
    pub password_env: Option<String>,
    /// Keep alive interval in seconds (default: 60)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Use TLS towards the broker
    #[serde(default)]
    pub tls: bool,
    /// QoS used for subscriptions and status publishes (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

/// Actuator backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,
    /// Root of the sysfs GPIO tree (default: /sys/class/gpio)
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    /// How valve pins are numbered: "bcm" or "board" (default: bcm, board for JSON files)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_numbering: Option<PinNumbering>,
    /// Base line of the GPIO chip, 512 on Raspberry Pi kernels 6.6 and later (default: 0)
    #[serde(default)]
    pub gpio_base: u32,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            gpio_root: default_gpio_root(),
            pin_numbering: None,
            gpio_base: 0,
        }
    }
}

impl BackendSection {
    pub fn pin_map(&self) -> PinMap {
        PinMap::new(self.pin_numbering.unwrap_or_default(), self.gpio_base)
    }
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Real output pins through the sysfs GPIO interface
    #[default]
    Gpio,
    /// In-memory valves for running without hardware
    Simulated,
}

/// Timing knobs for the connection cycle, command retries and status cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    /// Fixed delay between broker connection attempts (default: 5000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for a single connection attempt (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Status snapshot interval (default: 200)
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Total attempts for a valve write (default: 3)
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// Delay between valve write attempts (default: 1000)
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            status_interval_ms: default_status_interval_ms(),
            write_attempts: default_write_attempts(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
        }
    }
}

impl TimingSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_status_interval_ms() -> u64 {
    200
}

fn default_write_attempts() -> u32 {
    3
}

fn default_write_retry_delay_ms() -> u64 {
    1000
}

/// Logging section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Optional log file, rotated daily, written in addition to stdout
    pub file: Option<PathBuf>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid valve list: {0}")]
    InvalidValves(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No configuration file found (tried {0})")]
    NotFound(String),
}

impl NodeConfig {
    /// Load and validate configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file and resolve environment variables
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    /// The result is not validated yet, so callers can apply overrides first.
    pub fn read_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        config.resolve_env_vars()?;
        Ok(config)
    }

    /// Parse a TOML document without validating it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a JSON document without validating it
    ///
    /// JSON files come from deployments that numbered pins by header
    /// position, so board numbering applies unless the file says otherwise.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        config
            .backend
            .pin_numbering
            .get_or_insert(PinNumbering::Board);
        Ok(config)
    }

    /// Resolve the broker password from the environment when configured
    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(env_name) = &self.mqtt.password_env {
            let password = std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone()))?;
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    /// Validate required fields and the valve list
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::MissingField("device_id"));
        }
        validate_topic_segment(&self.device_id).map_err(ConfigError::InvalidDeviceId)?;

        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt.broker_host"));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.timing.write_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "timing.write_attempts must be at least 1".to_string(),
            ));
        }
        if self.timing.status_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "timing.status_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.validate_valves()
    }

    fn validate_valves(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut pins = HashSet::new();
        let pin_map = self.backend.pin_map();

        for valve in &self.valves {
            if valve.name.is_empty() {
                return Err(ConfigError::InvalidValves(
                    "valve name cannot be empty".to_string(),
                ));
            }
            validate_topic_segment(&valve.name).map_err(ConfigError::InvalidValves)?;
            if valve.name == STATUS_SEGMENT {
                return Err(ConfigError::InvalidValves(format!(
                    "valve name '{STATUS_SEGMENT}' collides with the status topic"
                )));
            }

            if !names.insert(valve.name.as_str()) {
                return Err(ConfigError::InvalidValves(format!(
                    "duplicate valve name '{}'",
                    valve.name
                )));
            }

            match valve.pin {
                Some(pin) => {
                    if self.backend.kind == BackendKind::Gpio && pin_map.line(pin).is_none() {
                        return Err(ConfigError::InvalidValves(format!(
                            "valve '{}': pin {pin} is not a GPIO pin in {:?} numbering",
                            valve.name, pin_map.numbering
                        )));
                    }
                    if !pins.insert(pin) {
                        return Err(ConfigError::InvalidValves(format!(
                            "pin {pin} is assigned to more than one valve"
                        )));
                    }
                }
                None if self.backend.kind == BackendKind::Gpio => {
                    return Err(ConfigError::InvalidValves(format!(
                        "valve '{}' has no pin but the gpio backend requires one",
                        valve.name
                    )));
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
device_id = "dev1"
valves = [
    { name = "A", pin = 1 },
    { name = "B", pin = 2 },
]

[mqtt]
broker_host = "localhost"

[backend]
kind = "simulated"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Topic segments may not contain level separators or wildcards
fn validate_topic_segment(segment: &str) -> Result<(), String> {
    if let Some(ch) = segment.chars().find(|c| matches!(c, '/' | '+' | '#')) {
        return Err(format!(
            "'{segment}' contains '{ch}', which is not allowed in a topic segment"
        ));
    }
    Ok(())
}
