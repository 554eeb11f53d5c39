use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for store access and reconciliation
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Resource not found in the store
    #[error("CStorPool not found: {name}")]
    #[diagnostic(
        code(cstor::controller::not_found),
        help("The resource may already have been garbage collected")
    )]
    NotFound {
        #[allow(unused)]
        name: String,
    },

    /// Resource already exists
    #[error("CStorPool already exists: {name}")]
    #[diagnostic(
        code(cstor::controller::already_exists),
        help("Update the existing resource instead, or delete it first")
    )]
    AlreadyExists {
        #[allow(unused)]
        name: String,
    },

    /// Write rejected because the resource changed since it was read
    #[error("Conflict writing CStorPool {name}: resource was modified concurrently")]
    #[diagnostic(
        code(cstor::controller::conflict),
        help("Re-read the resource and retry with the latest resourceVersion")
    )]
    Conflict {
        #[allow(unused)]
        name: String,
    },

    /// Conflicting writes kept winning
    #[error("Gave up writing CStorPool {name} after {attempts} conflicting attempts")]
    #[diagnostic(
        code(cstor::controller::conflict_retries_exhausted),
        help("Another writer is updating this resource continuously. The next notification will retry")
    )]
    ConflictRetriesExhausted {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        attempts: u32,
    },

    /// HTTP call to the resource API failed
    #[error("API request failed: {message}")]
    #[diagnostic(
        code(cstor::controller::api_request_failed),
        help("Verify the API server is reachable at --api-url")
    )]
    ApiRequestFailed {
        #[allow(unused)]
        message: String,
    },

    /// Pool command layer error
    #[error(transparent)]
    #[diagnostic(transparent)]
    RuntimeError(#[from] cstor_runtime::RuntimeError),

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] cstor_core::CoreError),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(cstor::controller::internal_error),
        help("This is likely a bug in cstor-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn conflict(name: impl Into<String>) -> Self {
        Self::Conflict { name: name.into() }
    }

    pub fn api_request_failed(message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound { .. })
    }
}
