//! Observability for the valve node
//!
//! Structured logging through `tracing`, written to stdout and optionally
//! to a daily-rotated log file.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};
