//! Payload encodings for valve commands and status snapshots
//!
//! Commands are plain ASCII decimal integers. Status snapshots are a single
//! JSON object mapping every declared valve name to `0` or `1`, in
//! declaration order.

use crate::actuator::Level;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::num::IntErrorKind;
use thiserror::Error;

/// A parsed inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveCommand {
    /// The integer as sent, `None` when it did not fit in 64 bits
    pub raw: Option<i64>,
    /// Level the valve is driven to
    pub level: Level,
}

/// Command payload decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is not valid UTF-8")]
    NotUtf8,
    #[error("Payload '{0}' is not an integer")]
    NotInteger(String),
}

/// Decode a command payload
///
/// Surrounding whitespace and a leading sign are accepted. Only the value
/// `1` opens a valve; every other integer, including ones beyond the 64-bit
/// range, closes it.
pub fn parse_command_payload(payload: &[u8]) -> Result<ValveCommand, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let trimmed = text.trim();

    match trimmed.parse::<i64>() {
        Ok(value) => Ok(ValveCommand {
            raw: Some(value),
            level: Level::from_command(value),
        }),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Ok(ValveCommand {
                raw: None,
                level: Level::Off,
            })
        }
        Err(_) => Err(PayloadError::NotInteger(trimmed.to_string())),
    }
}

/// Levels of every declared valve at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    entries: Vec<(String, Level)>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push<S: Into<String>>(&mut self, name: S, level: Level) {
        self.entries.push((name.into(), level));
    }

    pub fn get(&self, name: &str) -> Option<Level> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, level)| *level)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Level)> {
        self.entries.iter().map(|(n, l)| (n.as_str(), *l))
    }

    /// Encode as the JSON status payload
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl FromIterator<(String, Level)> for StatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Level)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for StatusSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, level) in &self.entries {
            map.serialize_entry(name, &level.as_u8())?;
        }
        map.end()
    }
}
