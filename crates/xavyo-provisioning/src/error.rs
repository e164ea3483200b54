//! Provisioning error types.
//!
//! Three layers: [`MappingError`] fails a single record's attribute
//! resolution, [`StoreError`] comes from the identity store, and
//! [`ProvisioningError`] aborts a whole run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use xavyo_connector::error::{ConnectorError, ErrorClass};

use crate::validation::{describe, Violation};

/// Errors resolving attributes through a mapping.
#[derive(Debug, Error)]
pub enum MappingError {
    /// A mandatory item produced no value.
    #[error("mandatory mapping item '{item}' has no value")]
    MissingMandatory { item: String },

    /// The mapping itself is malformed.
    #[error("invalid mapping: {message}")]
    Invalid { message: String },

    #[error("transform failed for '{item}': {message}")]
    Transform { item: String, message: String },

    /// A virtual attribute could not be resolved through the store.
    #[error("virtual attribute '{name}' could not be resolved: {source}")]
    Virtual {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("password handling failed: {message}")]
    Password { message: String },

    /// A unique-constrained attribute received more than one value.
    #[error("attribute '{attribute}' is unique but received {count} values")]
    MultipleUniqueValues { attribute: String, count: usize },
}

impl MappingError {
    pub fn missing(item: impl Into<String>) -> Self {
        Self::MissingMandatory { item: item.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn password(message: impl Into<String>) -> Self {
        Self::Password {
            message: message.into(),
        }
    }
}

/// Errors reported by the identity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    /// The record failed validation and was not persisted.
    #[error("validation failed: {}", describe(.0))]
    Violations(Vec<Violation>),

    /// Optimistic concurrency check failed.
    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Run-level failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The connector could not be reached or is misconfigured.
    #[error("connectivity check failed for resource {resource}: {source}")]
    Connectivity {
        resource: String,
        #[source]
        source: ConnectorError,
    },

    /// No usable mapping for the run.
    #[error("mapping error for {resource}/{object_class}: {message}")]
    Mapping {
        resource: String,
        object_class: String,
        message: String,
    },

    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: String },

    /// Enumeration or change feed failed mid-stream.
    #[error("stream failed: {source}")]
    Stream {
        #[source]
        source: ConnectorError,
    },

    /// The sync token could not be read or committed.
    #[error("sync token store failed: {source}")]
    TokenStore {
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("unknown action '{name}'")]
    UnknownAction { name: String },

    #[error("invalid task: {}", describe(.0))]
    InvalidTask(Vec<Violation>),

    #[error("a run for {resource}/{object_class} is already in progress")]
    AlreadyRunning {
        resource: String,
        object_class: String,
    },

    #[error("run interrupted by shutdown")]
    Interrupted,

    /// The task running the run panicked or was cancelled.
    #[error("run aborted: {message}")]
    Aborted { message: String },
}

impl ProvisioningError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProvisioningError::Connectivity { .. } => "CONNECTIVITY",
            ProvisioningError::Mapping { .. } => "MAPPING",
            ProvisioningError::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            ProvisioningError::Stream { .. } => "STREAM_FAILED",
            ProvisioningError::TokenStore { .. } => "TOKEN_STORE",
            ProvisioningError::Store(_) => "STORE",
            ProvisioningError::Configuration { .. } => "CONFIGURATION",
            ProvisioningError::UnknownAction { .. } => "UNKNOWN_ACTION",
            ProvisioningError::InvalidTask(_) => "INVALID_TASK",
            ProvisioningError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            ProvisioningError::Interrupted => "INTERRUPTED",
            ProvisioningError::Aborted { .. } => "ABORTED",
        }
    }
}

/// Result type for run-level operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Classification of a per-record or per-pair failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "class", rename_all = "snake_case")]
pub enum FailureKind {
    /// Reported by the connector.
    Connector(ErrorClass),
    Mapping,
    /// Rejected by validation before any remote call.
    Validation,
    Store,
    /// Correlation found more than one candidate identity.
    Correlation,
    /// A sync or push action failed.
    Action,
}

/// Failure of one record inside a run; never aborts the run.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Store(StoreError),

    #[error("ambiguous correlation: {count} identities match {attribute}={value}")]
    Correlation {
        attribute: String,
        value: String,
        count: usize,
    },

    #[error("action '{name}' failed: {message}")]
    Action { name: String, message: String },
}

impl From<StoreError> for RecordError {
    fn from(e: StoreError) -> Self {
        RecordError::Store(e)
    }
}

impl RecordError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RecordError::Connector(e) => FailureKind::Connector(e.class()),
            RecordError::Mapping(_) => FailureKind::Mapping,
            RecordError::Store(StoreError::Violations(_)) => FailureKind::Validation,
            RecordError::Store(_) => FailureKind::Store,
            RecordError::Correlation { .. } => FailureKind::Correlation,
            RecordError::Action { .. } => FailureKind::Action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ViolationKind;

    #[test]
    fn test_error_display() {
        let err = MappingError::missing("mail");
        assert_eq!(err.to_string(), "mandatory mapping item 'mail' has no value");

        let err = StoreError::Violations(vec![Violation::new(
            "email",
            ViolationKind::UniqueWithGeneralValues,
            "unique attribute must not carry general values",
        )]);
        assert!(err.to_string().contains("email: unique attribute"));
    }

    #[test]
    fn test_record_error_kinds() {
        let err: RecordError = ConnectorError::operation_failed("boom").into();
        assert_eq!(err.kind(), FailureKind::Connector(ErrorClass::Remote));

        let err: RecordError = StoreError::Violations(vec![]).into();
        assert_eq!(err.kind(), FailureKind::Validation);

        let err: RecordError = MappingError::missing("x").into();
        assert_eq!(err.kind(), FailureKind::Mapping);
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_value(FailureKind::Connector(ErrorClass::Timeout)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "connector", "class": "timeout"}));
        let json = serde_json::to_value(FailureKind::Mapping).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "mapping"}));
    }

    #[test]
    fn test_provisioning_error_codes() {
        let err = ProvisioningError::Connectivity {
            resource: "ldap".into(),
            source: ConnectorError::connection_failed("refused"),
        };
        assert_eq!(err.error_code(), "CONNECTIVITY");
        assert!(err.to_string().contains("ldap"));
    }
}
