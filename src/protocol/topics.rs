//! Topic construction for the valve node
//!
//! Every topic is namespaced by the device identifier:
//!
//! - `{device_id}/valves/{name}` carries commands for one valve
//! - `{device_id}/valves/status` carries the periodic status snapshot

/// Segment between the device identifier and the valve name
pub const VALVES_SEGMENT: &str = "valves";

/// Final segment of the status topic
pub const STATUS_SEGMENT: &str = "status";

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build valve command topic: `{device_id}/valves/{name}`
    pub fn command_topic(device_id: &str, valve: &str) -> String {
        format!("{device_id}/{VALVES_SEGMENT}/{valve}")
    }

    /// Build status topic: `{device_id}/valves/status`
    pub fn status_topic(device_id: &str) -> String {
        format!("{device_id}/{VALVES_SEGMENT}/{STATUS_SEGMENT}")
    }
}

/// Valve name addressed by a command topic: its final `/`-separated segment
pub fn valve_name_from_topic(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}
