//! Error types for the sensor agent
//!
//! Only startup misconfiguration is terminal. Measurement errors stay inside
//! the poll loop and link errors stay inside the messaging link's recovery.

use crate::config::ConfigError;
use crate::transport::mqtt::LinkError;
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No sensor types were specified")]
    NoSensorTypesConfigured,

    #[error("No working sensors found for sensor types: {types:?}")]
    NoSensorsFound { types: Vec<String> },

    #[error("Unknown sensor type: {0}")]
    UnknownSensorType(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Messaging link error: {0}")]
    LinkError(#[from] LinkError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl AgentError {
    /// Errors that leave the agent without a valid running state
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::NoSensorTypesConfigured
                | AgentError::NoSensorsFound { .. }
                | AgentError::UnknownSensorType(_)
                | AgentError::ConfigError(_)
        )
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
