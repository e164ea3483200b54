//! Connector Framework error types
//!
//! Error definitions with transient/permanent classification for retry logic
//! and a coarse [`ErrorClass`] used when reporting outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::capability::Capability;

/// Coarse classification of a connector failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Connector unreachable or misconfigured.
    Connectivity,
    InvalidCredentials,
    /// Remote object absent.
    NotFound,
    /// Remote object already exists or violates a remote constraint.
    Conflict,
    CapabilityUnsupported,
    /// No response within the configured deadline.
    Timeout,
    /// Any other failure reported by the remote system.
    Remote,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::InvalidCredentials => "invalid_credentials",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::CapabilityUnsupported => "capability_unsupported",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Remote => "remote",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (usually transient)
    /// Failed to establish connection to target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Target system is temporarily unavailable.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// A call did not complete within its deadline.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // Authentication / configuration errors (permanent)
    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    InvalidCredentials,

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Capability errors
    /// The connector does not implement the requested operation.
    #[error("connector does not support {capability}")]
    CapabilityUnsupported { capability: Capability },

    /// The connector does not handle the requested object class.
    #[error("object class '{object_class}' not supported")]
    ObjectClassNotSupported { object_class: String },

    // Operation errors
    /// Object not found in target system (update/delete target missing).
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Object already exists in target system (create conflict).
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Constraint violation in target system.
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Invalid data format.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Operation failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ConnectorError {
    /// Check if this error is transient and the operation should be retried.
    ///
    /// Transient errors are those caused by temporary conditions that may resolve
    /// themselves, such as network issues or temporary unavailability.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::TargetUnavailable { .. }
                | ConnectorError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// The remote object is absent. Callers usually treat this as an outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::ObjectNotFound { .. })
    }

    /// Classify the error for outcome reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectorError::ConnectionFailed { .. }
            | ConnectorError::TargetUnavailable { .. }
            | ConnectorError::InvalidConfiguration { .. } => ErrorClass::Connectivity,
            ConnectorError::Timeout { .. } => ErrorClass::Timeout,
            ConnectorError::InvalidCredentials => ErrorClass::InvalidCredentials,
            ConnectorError::CapabilityUnsupported { .. }
            | ConnectorError::ObjectClassNotSupported { .. } => ErrorClass::CapabilityUnsupported,
            ConnectorError::ObjectNotFound { .. } => ErrorClass::NotFound,
            ConnectorError::ObjectAlreadyExists { .. }
            | ConnectorError::ConstraintViolation { .. } => ErrorClass::Conflict,
            ConnectorError::InvalidData { .. }
            | ConnectorError::OperationFailed { .. }
            | ConnectorError::Internal { .. } => ErrorClass::Remote,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::Timeout { .. } => "TIMEOUT",
            ConnectorError::InvalidCredentials => "INVALID_CREDENTIALS",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::CapabilityUnsupported { .. } => "CAPABILITY_UNSUPPORTED",
            ConnectorError::ObjectClassNotSupported { .. } => "OBJECT_CLASS_NOT_SUPPORTED",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectNotFound {
            identifier: identifier.into(),
        }
    }

    pub fn already_exists(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectAlreadyExists {
            identifier: identifier.into(),
        }
    }

    pub fn unsupported(capability: Capability) -> Self {
        ConnectorError::CapabilityUnsupported { capability }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        ConnectorError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
