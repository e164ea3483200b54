//! Identity data model.
//!
//! Internal identities with typed attributes and the resource links that tie
//! them to their remote counterparts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use xavyo_connector::operation::Uid;

use crate::error::MappingError;
use crate::password::EncryptedPassword;

/// Stable key of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(Uuid);

impl IdentityKey {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for IdentityKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for IdentityKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Key of a configured resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyTypeKind {
    User,
    Group,
    AnyObject,
}

/// A named identity type, e.g. `USER`, `GROUP` or `PRINTER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnyType {
    pub key: String,
    pub kind: AnyTypeKind,
}

impl AnyType {
    pub const USER: &'static str = "USER";
    pub const GROUP: &'static str = "GROUP";

    #[must_use]
    pub fn user() -> Self {
        Self {
            key: Self::USER.to_string(),
            kind: AnyTypeKind::User,
        }
    }

    #[must_use]
    pub fn group() -> Self {
        Self {
            key: Self::GROUP.to_string(),
            kind: AnyTypeKind::Group,
        }
    }

    pub fn any_object(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: AnyTypeKind::AnyObject,
        }
    }
}

/// Schema of one identity attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: String,
    #[serde(default)]
    pub multi_valued: bool,
    /// The value lives in the distinguished unique slot.
    #[serde(default)]
    pub unique_constraint: bool,
}

impl AttributeSchema {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multi_valued: false,
            unique_constraint: false,
        }
    }

    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            multi_valued: true,
            ..Self::single(name)
        }
    }

    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            unique_constraint: true,
            ..Self::single(name)
        }
    }
}

/// Value(s) of one identity attribute.
///
/// Unique-constrained attributes keep their value in `unique_value` and
/// nothing in `values`; every other attribute uses `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub schema: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_value: Option<String>,
}

impl Attribute {
    pub fn single(schema: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            values: vec![value.into()],
            unique_value: None,
        }
    }

    pub fn multi<I, S>(schema: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schema: schema.into(),
            values: values.into_iter().map(Into::into).collect(),
            unique_value: None,
        }
    }

    pub fn unique(schema: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            values: Vec::new(),
            unique_value: Some(value.into()),
        }
    }

    /// Build an attribute shaped according to its schema.
    ///
    /// A unique-constrained attribute takes exactly one value.
    pub fn for_schema(schema: &AttributeSchema, values: Vec<String>) -> Result<Self, MappingError> {
        if !schema.unique_constraint {
            return Ok(Self::multi(&schema.name, values));
        }
        let count = values.len();
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (Some(value), None) => Ok(Self::unique(&schema.name, value)),
            (None, _) => Ok(Self::multi(&schema.name, Vec::<String>::new())),
            (Some(_), Some(_)) => Err(MappingError::MultipleUniqueValues {
                attribute: schema.name.clone(),
                count,
            }),
        }
    }

    /// All values regardless of slot.
    pub fn all_values(&self) -> Vec<&str> {
        self.unique_value
            .iter()
            .chain(self.values.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Lifecycle status of an identity; drives the remote enable flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    #[default]
    Active,
    Suspended,
}

/// Link between an identity and its remote object on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub resource: ResourceKey,
    pub uid: Uid,
    pub linked_at: DateTime<Utc>,
}

/// An internal identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub key: IdentityKey,
    /// Key of the identity's [`AnyType`].
    pub any_type: String,
    pub name: String,
    #[serde(default)]
    pub status: IdentityStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<EncryptedPassword>,
    #[serde(default)]
    pub links: Vec<ResourceLink>,
    /// Incremented by the store on every save.
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(any_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: IdentityKey::new(),
            any_type: any_type.into(),
            name: name.into(),
            status: IdentityStatus::Active,
            attributes: BTreeMap::new(),
            password: None,
            links: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.set_attribute(attribute);
        self
    }

    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.attributes.insert(attribute.schema.clone(), attribute);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Values of an attribute, empty if unset.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.attribute(name)
            .map(|attr| attr.all_values().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    pub fn link(&self, resource: &ResourceKey) -> Option<&ResourceLink> {
        self.links.iter().find(|link| &link.resource == resource)
    }

    /// Record the remote id on a resource, replacing any previous link.
    pub fn set_link(&mut self, resource: &ResourceKey, uid: Uid) {
        self.links.retain(|link| &link.resource != resource);
        self.links.push(ResourceLink {
            resource: resource.clone(),
            uid,
            linked_at: Utc::now(),
        });
    }

    /// Remove the link to a resource; returns whether one existed.
    pub fn unlink(&mut self, resource: &ResourceKey) -> bool {
        let before = self.links.len();
        self.links.retain(|link| &link.resource != resource);
        self.links.len() < before
    }
}
