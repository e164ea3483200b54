//! Connector Framework schema types
//!
//! Types for representing target system schemas (object classes, attributes)
//! and the special attribute names understood by every connector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::ObjectClass;

/// Naming attribute of a remote object.
pub const NAME: &str = "__NAME__";
/// Remote identifier assigned by the target system.
pub const UID: &str = "__UID__";
/// Password attribute; write-only.
pub const PASSWORD: &str = "__PASSWORD__";
/// Enable/disable flag.
pub const ENABLE: &str = "__ENABLE__";

/// All special attribute names.
pub const SPECIAL_NAMES: [&str; 4] = [NAME, UID, PASSWORD, ENABLE];

/// Whether the attribute name is one of the special `__X__` names.
#[must_use]
pub fn is_special(name: &str) -> bool {
    SPECIAL_NAMES.contains(&name)
}

/// Schema representing the structure of a target system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// The object classes available in this schema.
    pub object_classes: Vec<ObjectClassInfo>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_object_class(mut self, info: ObjectClassInfo) -> Self {
        self.object_classes.push(info);
        self
    }

    pub fn get_object_class(&self, object_class: &ObjectClass) -> Option<&ObjectClassInfo> {
        self.object_classes
            .iter()
            .find(|info| info.object_class.is(object_class))
    }

    /// Attribute names across the given object classes.
    ///
    /// Special names are only kept when `include_special` is set.
    pub fn names<'a>(
        &self,
        object_classes: impl IntoIterator<Item = &'a ObjectClass>,
        include_special: bool,
    ) -> BTreeSet<String> {
        object_classes
            .into_iter()
            .filter_map(|oc| self.get_object_class(oc))
            .flat_map(|info| info.attributes.iter())
            .map(|attr| attr.name.clone())
            .filter(|name| include_special || !is_special(name))
            .collect()
    }
}

/// Schema information for one object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectClassInfo {
    pub object_class: ObjectClass,
    #[serde(default)]
    pub attributes: Vec<AttributeInfo>,
}

impl ObjectClassInfo {
    pub fn new(object_class: ObjectClass) -> Self {
        Self {
            object_class,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeInfo) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// An attribute in an object class schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,

    /// Whether this attribute can have multiple values.
    #[serde(default)]
    pub multi_valued: bool,

    /// Whether this attribute is required for create operations.
    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_true")]
    pub readable: bool,

    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl AttributeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multi_valued: false,
            required: false,
            readable: true,
            writable: true,
        }
    }

    /// Mark this attribute as multi-valued.
    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }
}
