//! Error types and result aliases for vigil.
//!
//! This module defines the shared error types used across all vigil
//! components. Errors are structured for programmatic handling; the API
//! layer maps each variant to a stable HTTP status.

/// The result type used throughout vigil.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vigil operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid operation identifier was provided.
    #[error("invalid operation id: {message}")]
    InvalidId {
        /// Description of what made the id invalid.
        message: String,
    },

    /// No operation with the given id exists.
    #[error("operation not found: {id}")]
    NotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller-supplied auth token does not match the operation's token.
    #[error("invalid auth token")]
    InvalidAuthToken,

    /// A mutation was attempted on an operation in a terminal state.
    #[error("operation already completed: {id}")]
    OperationCompleted {
        /// The identifier of the terminal operation.
        id: String,
    },

    /// A request carried an invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A persisted record could not be decoded or projected.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new not-found error for the given id.
    #[must_use]
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Returns true if this error indicates a terminal-state conflict.
    #[must_use]
    pub const fn is_operation_completed(&self) -> bool {
        matches!(self, Self::OperationCompleted { .. })
    }
}
