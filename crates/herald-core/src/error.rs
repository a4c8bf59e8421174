//! Shared error type across herald crates.

use thiserror::Error;

/// Stable error categories (used in logs, metrics labels and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structurally invalid input at a public API boundary.
    InvalidArgument,
    /// Invalid or inconsistent configuration.
    Config,
    /// Payload or envelope could not be (de)serialized.
    Serialization,
    /// Wire type name not known to this process.
    UnknownType,
    /// No handler registered for a command.
    NoHandler,
    /// Handler or callback reported a failure.
    Handler,
    /// Broker connection, channel or publish failure.
    Transport,
    /// Bounded wait elapsed.
    Timeout,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::UnknownType => "UNKNOWN_TYPE",
            ErrorKind::NoHandler => "NO_HANDLER",
            ErrorKind::Handler => "HANDLER",
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// Unified error type used by core, dispatcher and transports.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("no handler for {0}")]
    NoHandler(String),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timed out")]
    Timeout,
    #[error("internal: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Map an error to its stable category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            HeraldError::Config(_) => ErrorKind::Config,
            HeraldError::Serialization(_) => ErrorKind::Serialization,
            HeraldError::UnknownType(_) => ErrorKind::UnknownType,
            HeraldError::NoHandler(_) => ErrorKind::NoHandler,
            HeraldError::Handler(_) => ErrorKind::Handler,
            HeraldError::Transport(_) => ErrorKind::Transport,
            HeraldError::Timeout => ErrorKind::Timeout,
            HeraldError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for handler implementations.
    pub fn handler(msg: impl Into<String>) -> Self {
        HeraldError::Handler(msg.into())
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(e: serde_json::Error) -> Self {
        HeraldError::Serialization(e.to_string())
    }
}
