//! Wire conventions for the valve node
//!
//! Topic layout and payload encodings shared by the command path and the
//! status reporter. Nothing in here performs I/O.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
