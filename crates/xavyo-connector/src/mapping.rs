//! Attribute Mapping types for provisioning.
//!
//! Defines how internal identity attributes map to the attributes of one
//! remote object class. A [`Mapping`] belongs to exactly one resource and is
//! resolved once per run.

use serde::{Deserialize, Serialize};

use crate::schema::{ENABLE, NAME, PASSWORD};
use crate::types::ObjectClass;

/// Mapping of an identity kind onto one remote object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Identity kind key this mapping provisions (e.g. `USER`).
    pub any_type: String,

    /// The remote object class this mapping applies to.
    pub object_class: ObjectClass,

    /// Individual attribute mappings.
    #[serde(default)]
    pub items: Vec<MappingItem>,
}

impl Mapping {
    pub fn new(any_type: impl Into<String>, object_class: ObjectClass) -> Self {
        Self {
            any_type: any_type.into(),
            object_class,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: MappingItem) -> Self {
        self.items.push(item);
        self
    }

    /// The item providing the remote object's name.
    pub fn identifier_item(&self) -> Option<&MappingItem> {
        self.items
            .iter()
            .find(|item| item.purpose == ItemPurpose::Identifier)
    }

    /// Items used to match remote objects against internal identities.
    pub fn correlation_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items.iter().filter(|item| item.correlation)
    }

    /// Items applied when propagating internal state outwards.
    pub fn outbound_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items.iter().filter(|item| item.direction.is_outbound())
    }

    /// Items applied when pulling remote state inwards.
    pub fn inbound_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items.iter().filter(|item| item.direction.is_inbound())
    }

    /// Structural problems that make the mapping unusable.
    ///
    /// An empty list means the mapping is well formed.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let identifiers = self
            .items
            .iter()
            .filter(|item| item.purpose == ItemPurpose::Identifier)
            .count();
        if identifiers != 1 {
            problems.push(format!(
                "mapping for {} must have exactly one identifier item, found {}",
                self.object_class, identifiers
            ));
        }

        let passwords = self
            .items
            .iter()
            .filter(|item| item.purpose == ItemPurpose::Password)
            .count();
        if passwords > 1 {
            problems.push(format!(
                "mapping for {} has {} password items",
                self.object_class, passwords
            ));
        }

        for item in &self.items {
            if item.purpose == ItemPurpose::None && item.remote_name.trim().is_empty() {
                problems.push("mapping item without a remote attribute name".to_string());
            }
            if let ItemSource::Derived { template } = &item.source {
                if !template.contains('{') {
                    problems.push(format!(
                        "derived item {} has no attribute placeholder",
                        item.remote_attribute_name()
                    ));
                }
            }
        }

        problems
    }
}

/// Special role of a mapping item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPurpose {
    #[default]
    None,
    /// Becomes the remote object's name (`__NAME__`).
    Identifier,
    /// Carries the password (`__PASSWORD__`).
    Password,
    /// Maps the identity status to the enable flag (`__ENABLE__`).
    Enable,
}

/// Where the internal value of a mapping item comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemSource {
    /// A plain identity attribute.
    Attribute { name: String },
    /// The identity's name.
    Name,
    /// The identity's key.
    Key,
    /// A template over identity attributes, e.g. `{givenName}.{surname}`.
    Derived { template: String },
    /// A virtual attribute resolved through the store.
    Virtual { name: String },
    /// A constant value.
    Constant { value: String },
}

impl ItemSource {
    /// Internal attribute name written back on inbound mapping, if any.
    pub fn writable_attribute(&self) -> Option<&str> {
        match self {
            ItemSource::Attribute { name } => Some(name),
            _ => None,
        }
    }
}

/// Transformation to apply to an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Lowercase,
    Uppercase,
    /// Trim whitespace.
    Trim,
    /// Replace occurrences.
    Replace { from: String, to: String },
    /// Apply regex and keep a capture group (0 for the whole match).
    Regex {
        pattern: String,
        #[serde(default)]
        group: usize,
    },
    /// Apply a default if the value is empty.
    Default { value: String },
}

/// Direction in which a mapping item is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    /// Internal to remote only.
    Outbound,
    /// Remote to internal only.
    Inbound,
    #[default]
    Both,
}

impl MappingDirection {
    pub fn is_outbound(&self) -> bool {
        matches!(self, MappingDirection::Outbound | MappingDirection::Both)
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, MappingDirection::Inbound | MappingDirection::Both)
    }
}

/// A single attribute correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingItem {
    /// Remote attribute name; ignored for items with a special purpose.
    #[serde(default)]
    pub remote_name: String,

    pub source: ItemSource,

    #[serde(default)]
    pub purpose: ItemPurpose,

    /// Resolution fails if no value can be produced.
    #[serde(default)]
    pub mandatory: bool,

    /// Used to match remote objects to identities on pull.
    #[serde(default)]
    pub correlation: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<Transform>,

    #[serde(default)]
    pub direction: MappingDirection,
}

impl MappingItem {
    /// Map an identity attribute to a remote attribute of the same shape.
    pub fn attribute(internal: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            remote_name: remote.into(),
            source: ItemSource::Attribute {
                name: internal.into(),
            },
            purpose: ItemPurpose::None,
            mandatory: false,
            correlation: false,
            transforms: Vec::new(),
            direction: MappingDirection::Both,
        }
    }

    /// Map a source to the remote object's name.
    pub fn identifier(source: ItemSource) -> Self {
        Self {
            remote_name: NAME.to_string(),
            source,
            purpose: ItemPurpose::Identifier,
            mandatory: true,
            correlation: false,
            transforms: Vec::new(),
            direction: MappingDirection::Both,
        }
    }

    /// The password item; the source is ignored, the identity password is used.
    pub fn password() -> Self {
        Self {
            remote_name: PASSWORD.to_string(),
            source: ItemSource::Constant {
                value: String::new(),
            },
            purpose: ItemPurpose::Password,
            mandatory: false,
            correlation: false,
            transforms: Vec::new(),
            direction: MappingDirection::Outbound,
        }
    }

    /// The enable flag item, driven by the identity status.
    pub fn enable() -> Self {
        Self {
            remote_name: ENABLE.to_string(),
            source: ItemSource::Constant {
                value: String::new(),
            },
            purpose: ItemPurpose::Enable,
            mandatory: false,
            correlation: false,
            transforms: Vec::new(),
            direction: MappingDirection::Both,
        }
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn correlation(mut self) -> Self {
        self.correlation = true;
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: MappingDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Name of the remote attribute, taking the special purpose into account.
    pub fn remote_attribute_name(&self) -> &str {
        match self.purpose {
            ItemPurpose::Identifier => NAME,
            ItemPurpose::Password => PASSWORD,
            ItemPurpose::Enable => ENABLE,
            ItemPurpose::None => &self.remote_name,
        }
    }
}
