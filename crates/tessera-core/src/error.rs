// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Tessera operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A cluster object is missing a field the model requires
    #[error("Invalid {kind} object: {reason}")]
    #[diagnostic(
        code(tessera::invalid_object),
        help("Ensure the object carries metadata.name and metadata.namespace")
    )]
    InvalidObject {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(tessera::serialization_error),
        help("Ensure the input is valid JSON or YAML in Kubernetes object shape")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(tessera::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidObject error
    pub fn invalid_object(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
