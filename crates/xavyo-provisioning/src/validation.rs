//! Explicit validation of identities and identity types.
//!
//! Validators return a structured list of violations and are invoked before
//! any persistence or remote call. An empty list means the value is valid.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{AnyType, AnyTypeKind, Attribute, AttributeSchema, Identity};

/// Category of a validation violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A unique-constrained attribute also carries general values.
    UniqueWithGeneralValues,
    /// A unique-constrained attribute has nothing in its unique slot.
    MissingUniqueValue,
    /// A non-unique attribute uses the unique slot.
    UnexpectedUniqueValue,
    /// A single-valued attribute does not carry exactly one value.
    InvalidValueCount,
    /// No schema is registered for the attribute.
    UnknownSchema,
    MissingName,
    InvalidAnyType,
    /// A referenced resource does not exist.
    UnknownResource,
    /// A configured action name is not registered.
    UnknownAction,
}

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Offending property, e.g. the attribute name.
    pub property: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(property: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.message)
    }
}

/// Render a violation list on one line.
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check an attribute's value slots against its schema.
pub fn validate_attribute(attribute: &Attribute, schema: &AttributeSchema) -> Vec<Violation> {
    let mut violations = Vec::new();
    let name = &attribute.schema;

    if schema.unique_constraint {
        if !attribute.values.is_empty() {
            violations.push(Violation::new(
                name,
                ViolationKind::UniqueWithGeneralValues,
                "unique attribute must not carry general values",
            ));
        }
        if attribute.unique_value.is_none() {
            violations.push(Violation::new(
                name,
                ViolationKind::MissingUniqueValue,
                "unique attribute must carry exactly one unique value",
            ));
        }
        return violations;
    }

    if attribute.unique_value.is_some() {
        violations.push(Violation::new(
            name,
            ViolationKind::UnexpectedUniqueValue,
            "attribute without unique constraint must not use the unique slot",
        ));
    }
    if !schema.multi_valued && attribute.values.len() != 1 {
        violations.push(Violation::new(
            name,
            ViolationKind::InvalidValueCount,
            format!(
                "single-valued attribute must carry exactly one value, found {}",
                attribute.values.len()
            ),
        ));
    }

    violations
}

/// Check an identity against the registered attribute schemas.
pub fn validate_identity(
    identity: &Identity,
    schemas: &BTreeMap<String, AttributeSchema>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if identity.name.trim().is_empty() {
        violations.push(Violation::new(
            "name",
            ViolationKind::MissingName,
            "identity name must not be empty",
        ));
    }
    if identity.any_type.trim().is_empty() {
        violations.push(Violation::new(
            "any_type",
            ViolationKind::InvalidAnyType,
            "identity type must not be empty",
        ));
    }

    for (name, attribute) in &identity.attributes {
        match schemas.get(name) {
            Some(schema) => violations.extend(validate_attribute(attribute, schema)),
            None => violations.push(Violation::new(
                name,
                ViolationKind::UnknownSchema,
                "no schema registered for attribute",
            )),
        }
    }

    violations
}

/// Check that an identity type key matches its kind.
///
/// `USER` and `GROUP` are reserved for the user and group kinds.
pub fn validate_any_type(any_type: &AnyType) -> Vec<Violation> {
    let key = any_type.key.as_str();
    let message = match any_type.kind {
        _ if key.trim().is_empty() => Some("type key must not be empty".to_string()),
        AnyTypeKind::User if key != AnyType::USER => {
            Some(format!("user kind requires key {}", AnyType::USER))
        }
        AnyTypeKind::Group if key != AnyType::GROUP => {
            Some(format!("group kind requires key {}", AnyType::GROUP))
        }
        AnyTypeKind::AnyObject if key == AnyType::USER || key == AnyType::GROUP => {
            Some(format!("key {key} is reserved"))
        }
        _ => None,
    };

    message
        .map(|m| vec![Violation::new("key", ViolationKind::InvalidAnyType, m)])
        .unwrap_or_default()
}
