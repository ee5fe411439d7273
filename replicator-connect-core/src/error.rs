//! Error types for connectors and the runtime.
//!
//! Errors are grouped by how the control loop reacts to them:
//! - [`ConnectorError::Configuration`] aborts startup and is never retried
//! - [`ConnectorError::TransientCluster`] skips the current cycle; the next tick retries
//! - [`ConnectorError::PartialPropagation`] marks a sync cycle as degraded
//! - [`ConnectorError::Persistence`] is retried on the next persist tick while the
//!   in-memory position table keeps serving reads and writes

use std::error::Error as StdError;
use thiserror::Error;

/// Result type alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// Error type shared by connectors, the position store and the runtime
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Invalid or missing configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A broker could not be reached or did not answer in time
    #[error("Transient cluster error: {message}")]
    TransientCluster {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// One or more target brokers rejected a subscription-group upsert
    #[error(
        "Partial propagation of '{group}': {} of {attempted} target brokers failed ({})",
        .failed_brokers.len(),
        .failed_brokers.join(", ")
    )]
    PartialPropagation {
        group: String,
        failed_brokers: Vec<String>,
        attempted: usize,
    },

    /// Durable storage of the position table failed
    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation called in a lifecycle state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unrecoverable error, the connector should stop
    #[error("Fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl ConnectorError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a transient cluster error without a source
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientCluster {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient cluster error wrapping the underlying cause
    pub fn transient_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::TransientCluster {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a persistence error without a source
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Create a persistence error wrapping the underlying cause
    pub fn persistence_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fatal error wrapping the underlying cause
    pub fn fatal_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the next scheduled cycle may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientCluster { .. } | Self::PartialPropagation { .. } | Self::Persistence { .. }
        )
    }

    /// Whether the error must stop the connector
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Fatal { .. })
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence_with_source("I/O error", err)
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
