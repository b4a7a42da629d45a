use miette::Diagnostic;
use thiserror::Error;

/// Error type for endpoint slice reconciliation
#[derive(Error, Debug, Diagnostic)]
pub enum EndpointsError {
    /// Slice cannot be keyed
    #[error("Invalid endpoint slice: {reason}")]
    #[diagnostic(
        code(tessera::endpoints::invalid_slice),
        help("EndpointSlices must carry metadata.name and metadata.namespace")
    )]
    InvalidSlice {
        #[allow(unused)]
        reason: String,
    },

    /// One or more objects failed during a bulk operation
    #[error("{count} endpoint slice(s) failed to process")]
    #[diagnostic(
        code(tessera::endpoints::aggregate),
        help("Remaining slices were still processed. See the related errors for each failure")
    )]
    Aggregate {
        #[allow(unused)]
        count: usize,
        #[related]
        errors: Vec<EndpointsError>,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] tessera_core::CoreError),

    /// Internal error
    #[error("Internal endpoints error: {message}")]
    #[diagnostic(
        code(tessera::endpoints::internal_error),
        help("This is likely a bug in tessera-endpoints. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for endpoint operations
pub type Result<T> = std::result::Result<T, EndpointsError>;

impl EndpointsError {
    pub fn invalid_slice(reason: impl Into<String>) -> Self {
        Self::InvalidSlice {
            reason: reason.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Combine collected failures. An empty collection is success.
    pub fn aggregate(errors: Vec<EndpointsError>) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        Err(Self::Aggregate {
            count: errors.len(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(EndpointsError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn test_aggregate_keeps_every_error() {
        let err = EndpointsError::aggregate(vec![
            EndpointsError::invalid_slice("missing metadata.name"),
            EndpointsError::invalid_slice("missing metadata.namespace"),
        ])
        .unwrap_err();

        match err {
            EndpointsError::Aggregate { count, errors } => {
                assert_eq!(count, 2);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: EndpointsError =
            tessera_core::CoreError::invalid_object("EndpointSlice", "missing metadata.name").into();
        assert_eq!(
            err.to_string(),
            "Invalid EndpointSlice object: missing metadata.name"
        );
    }
}
