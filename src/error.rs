//! Error types for the query lifecycle manager.

use crate::types::QueryIdentity;
use thiserror::Error;

/// Wiring and settings errors, surfaced synchronously at the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Collaborator not configured: {0}")]
    MissingCollaborator(&'static str),

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Invalid query identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::Invalid(err.to_string())
    }
}

/// Failure of a compile step in the query compiler collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Query compilation failed: {0}")]
pub struct CompileError(pub String);

/// Errors reported by the transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Stream closed by remote: {0}")]
    StreamClosed(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Failure of the one-shot fetch execution.
///
/// Stored on the query context and returned to everyone awaiting the pending handle,
/// hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Execution for {identity} was superseded by a newer query shape")]
    Superseded { identity: QueryIdentity },

    #[error("Execution task aborted: {0}")]
    Aborted(String),
}

/// Failure of one subscription stream. Tears down every stream of the identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Subscription '{subscription}' failed: {source}")]
pub struct SubscriptionError {
    pub subscription: String,
    #[source]
    pub source: TransportError,
}
