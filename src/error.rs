//! Top-level error types for the valve node
//!
//! Each layer owns its own error enum; `NodeError` aggregates the ones that
//! can end the process (startup configuration and backend setup) together
//! with the transport errors surfaced by shutdown.

use thiserror::Error;

/// Main error type for node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Actuator backend error: {0}")]
    Backend(#[from] crate::actuator::BackendError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NodeError {
    /// Wrap any transport error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error stops the node before it reaches the run loop
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::Config(_) | NodeError::Backend(_) | NodeError::Logging { .. }
        )
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::BackendError;
    use crate::config::ConfigError;

    #[test]
    fn test_config_error_conversion() {
        let error: NodeError = ConfigError::MissingField("device_id").into();
        assert!(matches!(error, NodeError::Config(_)));
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required field: device_id"
        );
        assert!(error.is_startup_fatal());
    }

    #[test]
    fn test_backend_error_conversion() {
        let error: NodeError = BackendError::NotConfigured("A".to_string()).into();
        assert!(matches!(error, NodeError::Backend(_)));
        assert!(error.to_string().contains("'A'"));
        assert!(error.is_startup_fatal());
    }

    #[test]
    fn test_transport_error_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = NodeError::transport(io);
        assert!(error.to_string().contains("refused"));
        assert!(!error.is_startup_fatal());
    }

    #[test]
    fn test_internal_error_constructor() {
        let error = NodeError::internal("unexpected state");
        assert_eq!(error.to_string(), "Internal error: unexpected state");
    }
}
