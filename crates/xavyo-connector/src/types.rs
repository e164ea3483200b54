//! Connector Framework type definitions
//!
//! Identifiers, object classes and operation kinds shared by connectors and
//! the provisioning engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a configured connector instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(Uuid);

impl ConnectorId {
    /// Create a new random `ConnectorId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectorId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Remote object class handled by a connector (e.g. `__ACCOUNT__`, `__GROUP__`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectClass(String);

impl ObjectClass {
    /// Object class conventionally used for user accounts.
    pub const ACCOUNT_NAME: &'static str = "__ACCOUNT__";
    /// Object class conventionally used for groups.
    pub const GROUP_NAME: &'static str = "__GROUP__";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn account() -> Self {
        Self::new(Self::ACCOUNT_NAME)
    }

    #[must_use]
    pub fn group() -> Self {
        Self::new(Self::GROUP_NAME)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object class names compare case-insensitively on most target systems.
    #[must_use]
    pub fn is(&self, other: &ObjectClass) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectClass {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Type of provisioning operation against a target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Create a new object in the target system
    Create,
    /// Update an existing object in the target system
    Update,
    /// Delete an object from the target system
    Delete,
}

impl OperationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ParseOperationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(ParseOperationTypeError(s.to_string())),
        }
    }
}

/// Error parsing operation type from string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid operation type '{0}', expected one of: create, update, delete")]
pub struct ParseOperationTypeError(String);
