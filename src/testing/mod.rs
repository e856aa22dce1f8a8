//! Testing utilities and mock implementations
//!
//! Lets the node core be exercised without an MQTT broker or GPIO hardware.

pub mod mocks;

pub use mocks::*;
