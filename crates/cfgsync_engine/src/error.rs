//! Error types for the sync engine.

use cfgsync_protocol::CodecError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server rejected the credentials for this session.
    #[error("authentication rejected")]
    AuthRejected,

    /// A fallback write did not reach the persistence endpoint.
    #[error("persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    /// The configuration snapshot could not be read.
    #[error("configuration load failed: {0}")]
    ConfigLoadFailed(String),

    /// Raw input could not be converted to a field update.
    #[error("invalid input for {name}: {reason}")]
    InvalidInput {
        /// Field name.
        name: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// The engine has not finished loading the configuration.
    #[error("engine is not ready")]
    NotReady,

    /// Not connected over the live channel.
    #[error("not connected to server")]
    NotConnected,

    /// The engine task is gone.
    #[error("engine closed")]
    Closed,

    /// Protocol error (unexpected message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Startup configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::PersistenceWriteFailed(_)
            | SyncError::ConfigLoadFailed(_) => true,
            _ => false,
        }
    }
}

/// Errors in the field schema or rule definitions.
///
/// These are detected when the engine is built and are fatal to startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A name is not a registered field.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A value does not match the declared kind.
    #[error("field {name} expects {expected}, got {found}")]
    TypeMismatch {
        /// Field name.
        name: String,
        /// Declared kind.
        expected: String,
        /// Kind of the offending value.
        found: String,
    },

    /// A select field received a value outside its options.
    #[error("field {name} has no option {value:?}")]
    InvalidOption {
        /// Field name.
        name: String,
        /// Offending option.
        value: String,
    },

    /// A rule references a field that cannot act as a toggle.
    #[error("rule on {rule} needs a bool field, {name} is {kind}")]
    NotAToggle {
        /// Trigger of the offending rule.
        rule: String,
        /// Field that is not a bool.
        name: String,
        /// Its declared kind.
        kind: String,
    },
}
