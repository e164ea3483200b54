//! Connector Framework operation types
//!
//! Types exchanged with connectors: remote identifiers, attribute sets,
//! remote objects, filters, paging, options and change-feed deltas.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::schema::{NAME, UID};
use crate::types::ObjectClass;

/// Identifier assigned to an object by the target system.
///
/// Different systems use different identifier schemes:
/// - LDAP: Distinguished Name (DN) or entryUUID
/// - Database: Primary key column value
/// - REST: Resource ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Float(f64),
    /// Multiple values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Textual rendering of every scalar value; arrays are flattened.
    pub fn texts(&self) -> Vec<String> {
        match self {
            AttributeValue::Null => vec![],
            AttributeValue::String(s) => vec![s.clone()],
            AttributeValue::Integer(i) => vec![i.to_string()],
            AttributeValue::Boolean(b) => vec![b.to_string()],
            AttributeValue::Float(f) => vec![f.to_string()],
            AttributeValue::Array(values) => values.iter().flat_map(Self::texts).collect(),
        }
    }

    /// First textual value, if any.
    pub fn first_text(&self) -> Option<String> {
        self.texts().into_iter().next()
    }

    /// Build a single value or an array from a list of strings.
    pub fn from_texts(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => AttributeValue::Null,
            1 => AttributeValue::String(values.remove(0)),
            _ => AttributeValue::Array(values.into_iter().map(AttributeValue::String).collect()),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// A set of attributes sent on create/update or returned by reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet {
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Keep only the named attributes.
    pub fn retain_names(&mut self, names: &BTreeSet<String>) {
        self.attributes.retain(|name, _| names.contains(name));
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// An object read from the target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorObject {
    pub object_class: ObjectClass,
    pub uid: Uid,
    /// The naming attribute (`__NAME__`).
    pub name: String,
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl ConnectorObject {
    pub fn new(object_class: ObjectClass, uid: Uid, name: impl Into<String>) -> Self {
        Self {
            object_class,
            uid,
            name: name.into(),
            attributes: AttributeSet::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.set(name, value);
        self
    }

    /// Textual values of an attribute, resolving `__UID__` and `__NAME__`.
    pub fn texts(&self, attribute: &str) -> Vec<String> {
        match attribute {
            UID => vec![self.uid.value().to_string()],
            NAME => vec![self.name.clone()],
            other => self
                .attributes
                .get(other)
                .map(AttributeValue::texts)
                .unwrap_or_default(),
        }
    }
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where attribute contains value (substring).
    Contains { attribute: String, value: String },

    /// Match objects where attribute starts with value.
    StartsWith { attribute: String, value: String },

    /// Match objects where attribute exists (has any value).
    Present { attribute: String },

    And { filters: Vec<Filter> },

    Or { filters: Vec<Filter> },

    Not { filter: Box<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn contains(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::StartsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Combine this filter with another using AND.
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Evaluate the filter against an object held in memory.
    ///
    /// Connectors that search a native backend translate the filter instead;
    /// this is for connectors that hold objects locally and for tests.
    pub fn matches(&self, object: &ConnectorObject) -> bool {
        match self {
            Filter::Equals { attribute, value } => {
                object.texts(attribute).iter().any(|v| v == value)
            }
            Filter::Contains { attribute, value } => object
                .texts(attribute)
                .iter()
                .any(|v| v.contains(value.as_str())),
            Filter::StartsWith { attribute, value } => object
                .texts(attribute)
                .iter()
                .any(|v| v.starts_with(value.as_str())),
            Filter::Present { attribute } => !object.texts(attribute).is_empty(),
            Filter::And { filters } => filters.iter().all(|f| f.matches(object)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(object)),
            Filter::Not { filter } => !filter.matches(object),
        }
    }
}

/// One sort key for ordered searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub attribute: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl SortKey {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

/// Pagination request for search operations.
///
/// The cookie is opaque; a search may be resumed from it by a new call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of results to return.
    pub page_size: u32,

    /// Opaque cookie returned by the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortKey>,
}

impl PageRequest {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cookie: None,
            order_by: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100)
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub objects: Vec<ConnectorObject>,

    /// Cookie for the next page; `None` once the result set is exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cookie: Option<String>,

    /// Remaining results after this page, if the target reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

impl SearchResult {
    pub fn new(objects: Vec<ConnectorObject>) -> Self {
        Self {
            objects,
            next_cookie: None,
            remaining: None,
        }
    }

    pub fn with_next_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.next_cookie = Some(cookie.into());
        self
    }

    pub fn has_more(&self) -> bool {
        self.next_cookie.is_some()
    }
}

/// Options passed along with an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOptions {
    /// Attributes the caller wants returned; empty means connector default.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub attributes_to_get: BTreeSet<String>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes_to_get: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// Opaque cursor into a target system's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(String);

impl SyncToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDeltaType {
    Create,
    Update,
    /// Deletion marker; carries only the remote id.
    Delete,
}

/// A single change from the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub delta_type: SyncDeltaType,
    pub uid: Uid,
    /// The changed object; absent for deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<ConnectorObject>,
    /// Token positioned right after this change.
    pub token: SyncToken,
}

impl SyncDelta {
    pub fn created(object: ConnectorObject, token: SyncToken) -> Self {
        Self {
            delta_type: SyncDeltaType::Create,
            uid: object.uid.clone(),
            object: Some(object),
            token,
        }
    }

    pub fn updated(object: ConnectorObject, token: SyncToken) -> Self {
        Self {
            delta_type: SyncDeltaType::Update,
            uid: object.uid.clone(),
            object: Some(object),
            token,
        }
    }

    pub fn deleted(uid: Uid, token: SyncToken) -> Self {
        Self {
            delta_type: SyncDeltaType::Delete,
            uid,
            object: None,
            token,
        }
    }
}
