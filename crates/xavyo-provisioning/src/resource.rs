//! Resource configuration.

use serde::{Deserialize, Serialize};

use xavyo_connector::mapping::Mapping;
use xavyo_connector::types::{ConnectorId, ObjectClass};

use crate::identity::ResourceKey;
use crate::password::PasswordPropagation;

/// Configuration for one external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ResourceKey,
    /// Connector instance serving this resource.
    pub connector: ConnectorId,
    /// One mapping per remote object class.
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub password_propagation: PasswordPropagation,
}

impl Resource {
    pub fn new(key: impl Into<String>, connector: ConnectorId) -> Self {
        Self {
            key: ResourceKey::new(key),
            connector,
            mappings: Vec::new(),
            password_propagation: PasswordPropagation::default(),
        }
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn with_password_propagation(mut self, mode: PasswordPropagation) -> Self {
        self.password_propagation = mode;
        self
    }

    pub fn mapping_for(&self, object_class: &ObjectClass) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.object_class.is(object_class))
    }

    /// Mapping provisioning the given identity type.
    pub fn mapping_for_any_type(&self, any_type: &str) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.any_type == any_type)
    }
}
