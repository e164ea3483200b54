//! Attribute mapping resolution.
//!
//! Outbound: identity to the attribute set sent to a connector. Inbound:
//! remote object to the internal values used to create or update an
//! identity. Both walk the same mapping items.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use xavyo_connector::mapping::{ItemPurpose, ItemSource, Mapping, MappingItem, Transform};
use xavyo_connector::operation::{AttributeSet, AttributeValue, ConnectorObject};
use xavyo_connector::schema::{ENABLE, NAME, PASSWORD};

use crate::error::MappingError;
use crate::identity::{Attribute, AttributeSchema, Identity, IdentityStatus};
use crate::password::PasswordCipher;
use crate::resource::Resource;
use crate::store::Store;

/// Outbound result: the remote name plus every attribute to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttributes {
    pub name: String,
    /// Includes `__NAME__` and, where mapped, `__PASSWORD__` and `__ENABLE__`.
    pub attributes: AttributeSet,
}

/// Inbound result, keyed by internal attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundValues {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    /// Attributes the remote object carries; an empty list clears one.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Default-transform values for attributes the remote object omits,
    /// applied only where the identity has no value yet.
    pub defaults: BTreeMap<String, Vec<String>>,
    /// Mandatory items the remote object omits, internal name to remote name.
    /// The identity must already hold a value for each.
    pub required: BTreeMap<String, String>,
}

/// A value to match a remote object against existing identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    Name(String),
    Attribute { name: String, value: String },
}

/// Resolves mapping items in both directions.
#[derive(Clone)]
pub struct MappingResolver {
    store: Arc<dyn Store>,
    cipher: Option<Arc<PasswordCipher>>,
}

impl std::fmt::Debug for MappingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingResolver")
            .field("cipher", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl MappingResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cipher: None,
        }
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<PasswordCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Build the remote attribute set for an identity.
    ///
    /// Fails as a whole if any mandatory item has no value.
    pub async fn outbound(
        &self,
        identity: &Identity,
        resource: &Resource,
        mapping: &Mapping,
    ) -> Result<ResolvedAttributes, MappingError> {
        let mut name = None;
        let mut attributes = AttributeSet::new();

        for item in mapping.outbound_items() {
            match item.purpose {
                ItemPurpose::Password => {
                    if let Some(value) = self.password_value(identity, resource, item)? {
                        attributes.set(PASSWORD, value);
                    }
                }
                ItemPurpose::Enable => {
                    attributes.set(ENABLE, identity.is_enabled());
                }
                ItemPurpose::Identifier | ItemPurpose::None => {
                    let raw = self.source_values(identity, &item.source).await?;
                    let values = apply_transforms(item, raw)?;
                    if values.is_empty() {
                        if item.mandatory {
                            return Err(MappingError::missing(item.remote_attribute_name()));
                        }
                        continue;
                    }
                    if item.purpose == ItemPurpose::Identifier {
                        name = values.first().cloned();
                        attributes.set(NAME, values[0].clone());
                    } else {
                        attributes.set(item.remote_attribute_name(), AttributeValue::from_texts(values));
                    }
                }
            }
        }

        let name = name.ok_or_else(|| MappingError::missing(NAME))?;
        debug!(
            identity = %identity.key,
            object_class = %mapping.object_class,
            attributes = attributes.len(),
            "Outbound attributes resolved"
        );
        Ok(ResolvedAttributes { name, attributes })
    }

    /// Resolve only the identifier item, giving the remote name.
    pub async fn remote_name(
        &self,
        identity: &Identity,
        mapping: &Mapping,
    ) -> Result<String, MappingError> {
        let item = mapping
            .identifier_item()
            .ok_or_else(|| MappingError::missing(NAME))?;
        let raw = self.source_values(identity, &item.source).await?;
        apply_transforms(item, raw)?
            .into_iter()
            .next()
            .ok_or_else(|| MappingError::missing(NAME))
    }

    fn password_value(
        &self,
        identity: &Identity,
        resource: &Resource,
        item: &MappingItem,
    ) -> Result<Option<String>, MappingError> {
        let Some(sealed) = &identity.password else {
            if item.mandatory {
                return Err(MappingError::missing(PASSWORD));
            }
            return Ok(None);
        };
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| MappingError::password("no password cipher configured"))?;
        let cleartext = cipher.decrypt(identity.key, sealed)?;
        Ok(resource.password_propagation.render(&cleartext))
    }

    async fn source_values(
        &self,
        identity: &Identity,
        source: &ItemSource,
    ) -> Result<Vec<String>, MappingError> {
        Ok(match source {
            ItemSource::Attribute { name } => identity.values(name),
            ItemSource::Name => vec![identity.name.clone()],
            ItemSource::Key => vec![identity.key.to_string()],
            ItemSource::Derived { template } => {
                render_template(template, identity)?.into_iter().collect()
            }
            ItemSource::Virtual { name } => self
                .store
                .virtual_values(identity, name)
                .await
                .map_err(|source| MappingError::Virtual {
                    name: name.clone(),
                    source,
                })?,
            ItemSource::Constant { value } => vec![value.clone()],
        })
    }

    /// Extract internal values from a remote object.
    pub fn inbound(
        &self,
        object: &ConnectorObject,
        mapping: &Mapping,
    ) -> Result<InboundValues, MappingError> {
        let mut values = InboundValues::default();

        for item in mapping.inbound_items() {
            match item.purpose {
                ItemPurpose::Password => {}
                ItemPurpose::Enable => {
                    values.enabled = object
                        .attributes
                        .get(ENABLE)
                        .and_then(AttributeValue::as_boolean);
                }
                ItemPurpose::Identifier => {
                    let remote = apply_transforms(item, object.texts(NAME))?;
                    let name = remote
                        .into_iter()
                        .next()
                        .ok_or_else(|| MappingError::missing(NAME))?;
                    if let Some(attribute) = item.source.writable_attribute() {
                        values
                            .attributes
                            .insert(attribute.to_string(), vec![name.clone()]);
                    }
                    values.name = Some(name);
                }
                ItemPurpose::None => {
                    let Some(attribute) = item.source.writable_attribute() else {
                        continue;
                    };
                    if !object.attributes.has(&item.remote_name) {
                        let fallback = apply_transforms(item, Vec::new())?;
                        if !fallback.is_empty() {
                            values.defaults.insert(attribute.to_string(), fallback);
                        } else if item.mandatory {
                            values
                                .required
                                .insert(attribute.to_string(), item.remote_name.clone());
                        }
                        continue;
                    }
                    let remote = apply_transforms(item, object.texts(&item.remote_name))?;
                    if remote.is_empty() && item.mandatory {
                        return Err(MappingError::missing(&item.remote_name));
                    }
                    values.attributes.insert(attribute.to_string(), remote);
                }
            }
        }

        Ok(values)
    }

    /// Keys to find an existing identity for an unlinked remote object.
    pub fn correlation_keys(
        &self,
        object: &ConnectorObject,
        mapping: &Mapping,
    ) -> Result<Vec<CorrelationKey>, MappingError> {
        let mut keys = Vec::new();
        for item in mapping.correlation_items() {
            let Some(value) = apply_transforms(item, object.texts(item.remote_attribute_name()))?
                .into_iter()
                .next()
            else {
                continue;
            };
            match (&item.source, item.source.writable_attribute()) {
                (ItemSource::Name, _) => keys.push(CorrelationKey::Name(value)),
                (_, Some(attribute)) => keys.push(CorrelationKey::Attribute {
                    name: attribute.to_string(),
                    value,
                }),
                _ => {}
            }
        }
        Ok(keys)
    }

    /// Write inbound values onto an identity, shaping each attribute by its schema.
    ///
    /// Attributes the remote object omitted keep their current values. Fails
    /// when a unique attribute receives several values or a mandatory
    /// attribute ends up without one; the identity is then partially updated
    /// and must not be saved.
    pub fn apply_inbound(
        identity: &mut Identity,
        values: &InboundValues,
        schemas: &BTreeMap<String, AttributeSchema>,
    ) -> Result<(), MappingError> {
        if let Some(name) = values.name.as_deref().filter(|n| !n.is_empty()) {
            identity.name = name.to_string();
        }
        if let Some(enabled) = values.enabled {
            identity.status = if enabled {
                IdentityStatus::Active
            } else {
                IdentityStatus::Suspended
            };
        }
        for (name, remote) in &values.attributes {
            if remote.is_empty() {
                identity.remove_attribute(name);
                continue;
            }
            identity.set_attribute(shape(name, remote, schemas)?);
        }
        for (name, fallback) in &values.defaults {
            if identity.values(name).is_empty() {
                identity.set_attribute(shape(name, fallback, schemas)?);
            }
        }
        if let Some(remote_name) = values
            .required
            .iter()
            .find_map(|(name, remote_name)| identity.values(name).is_empty().then_some(remote_name))
        {
            return Err(MappingError::missing(remote_name));
        }
        Ok(())
    }
}

fn shape(
    name: &str,
    values: &[String],
    schemas: &BTreeMap<String, AttributeSchema>,
) -> Result<Attribute, MappingError> {
    match schemas.get(name) {
        Some(schema) => Attribute::for_schema(schema, values.to_vec()),
        None => Ok(Attribute::multi(name, values.to_vec())),
    }
}

/// Substitute `{attr}` placeholders with the first value of each attribute.
///
/// Returns `None` if any referenced attribute has no value.
fn render_template(template: &str, identity: &Identity) -> Result<Option<String>, MappingError> {
    let re = Regex::new(r"\{([^}]+)\}").map_err(|e| MappingError::invalid(e.to_string()))?;
    let mut rendered = template.to_string();

    for cap in re.captures_iter(template) {
        let placeholder = &cap[0];
        let attribute = &cap[1];
        let value = match attribute {
            "name" => Some(identity.name.clone()),
            other => identity.values(other).into_iter().next(),
        };
        match value {
            Some(value) => rendered = rendered.replace(placeholder, &value),
            None => return Ok(None),
        }
    }

    Ok(Some(rendered))
}

/// Apply the item's transforms to every value, dropping empty results.
fn apply_transforms(item: &MappingItem, values: Vec<String>) -> Result<Vec<String>, MappingError> {
    let mut values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();

    for transform in &item.transforms {
        if let Transform::Default { value } = transform {
            if values.is_empty() {
                values.push(value.clone());
            }
            continue;
        }
        values = values
            .into_iter()
            .map(|value| apply_transform(transform, &value))
            .collect::<Result<Vec<_>, String>>()
            .map_err(|message| MappingError::Transform {
                item: item.remote_attribute_name().to_string(),
                message,
            })?;
        values.retain(|v| !v.is_empty());
    }

    Ok(values)
}

fn apply_transform(transform: &Transform, value: &str) -> Result<String, String> {
    match transform {
        Transform::Lowercase => Ok(value.to_lowercase()),
        Transform::Uppercase => Ok(value.to_uppercase()),
        Transform::Trim => Ok(value.trim().to_string()),
        Transform::Replace { from, to } => Ok(value.replace(from, to)),
        Transform::Regex { pattern, group } => {
            let re = Regex::new(pattern).map_err(|e| format!("Invalid regex: {e}"))?;
            Ok(re
                .captures(value)
                .and_then(|caps| caps.get(*group))
                .map_or(String::new(), |m| m.as_str().to_string()))
        }
        Transform::Default { value: default } => {
            if value.is_empty() {
                Ok(default.clone())
            } else {
                Ok(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AnyType;
    use crate::password::PasswordPropagation;
    use crate::store::MemoryStore;
    use xavyo_connector::operation::Uid;
    use xavyo_connector::types::{ConnectorId, ObjectClass};

    fn mapping() -> Mapping {
        Mapping::new(AnyType::USER, ObjectClass::account())
            .with_item(MappingItem::identifier(ItemSource::Name).correlation())
            .with_item(MappingItem::attribute("email", "mail").mandatory().correlation())
            .with_item(
                MappingItem::attribute("surname", "sn").with_transform(Transform::Uppercase),
            )
            .with_item(MappingItem::password())
            .with_item(MappingItem::enable())
    }

    fn resource(mode: PasswordPropagation) -> Resource {
        Resource::new("ldap", ConnectorId::new())
            .with_mapping(mapping())
            .with_password_propagation(mode)
    }

    fn identity() -> Identity {
        Identity::new(AnyType::USER, "jdoe")
            .with_attribute(Attribute::unique("email", "jdoe@example.com"))
            .with_attribute(Attribute::single("surname", "Doe"))
            .with_attribute(Attribute::single("givenName", "John"))
    }

    fn resolver() -> MappingResolver {
        MappingResolver::new(Arc::new(MemoryStore::new()))
            .with_cipher(Arc::new(PasswordCipher::new([7u8; 32])))
    }

    #[tokio::test]
    async fn test_outbound_special_roles() {
        let resolver = resolver();
        let mut identity = identity();
        identity.status = IdentityStatus::Suspended;
        resolver
            .cipher
            .as_ref()
            .unwrap()
            .set_password(&mut identity, "secret")
            .unwrap();

        let resource = resource(PasswordPropagation::Cleartext);
        let resolved = resolver
            .outbound(&identity, &resource, &mapping())
            .await
            .unwrap();

        assert_eq!(resolved.name, "jdoe");
        assert_eq!(resolved.attributes.get_string(NAME), Some("jdoe"));
        assert_eq!(resolved.attributes.get_string("mail"), Some("jdoe@example.com"));
        assert_eq!(resolved.attributes.get_string("sn"), Some("DOE"));
        assert_eq!(resolved.attributes.get_string(PASSWORD), Some("secret"));
        assert_eq!(
            resolved.attributes.get(ENABLE).and_then(AttributeValue::as_boolean),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_password_modes() {
        let resolver = resolver();
        let mut identity = identity();
        resolver
            .cipher
            .as_ref()
            .unwrap()
            .set_password(&mut identity, "password")
            .unwrap();

        let hashed = resolver
            .outbound(&identity, &resource(PasswordPropagation::Sha256), &mapping())
            .await
            .unwrap();
        assert_eq!(
            hashed.attributes.get_string(PASSWORD),
            Some("5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8")
        );

        let omitted = resolver
            .outbound(&identity, &resource(PasswordPropagation::Omit), &mapping())
            .await
            .unwrap();
        assert!(!omitted.attributes.has(PASSWORD));
    }

    #[tokio::test]
    async fn test_missing_mandatory_fails_whole_resolution() {
        let mut identity = identity();
        identity.remove_attribute("email");

        let err = resolver()
            .outbound(&identity, &resource(PasswordPropagation::Omit), &mapping())
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::MissingMandatory { ref item } if item == "mail"));
    }

    #[tokio::test]
    async fn test_derived_virtual_and_default() {
        let store = MemoryStore::new();
        store
            .register_virtual("groups", |_: &Identity| vec!["staff".into(), "ops".into()])
            .await;
        let resolver = MappingResolver::new(Arc::new(store));

        let mapping = Mapping::new(AnyType::USER, ObjectClass::account())
            .with_item(MappingItem::identifier(ItemSource::Derived {
                template: "{givenName}.{surname}".into(),
            })
            .with_transform(Transform::Lowercase))
            .with_item(MappingItem {
                source: ItemSource::Virtual {
                    name: "groups".into(),
                },
                ..MappingItem::attribute("unused", "memberOf")
            })
            .with_item(
                MappingItem::attribute("department", "ou")
                    .with_transform(Transform::Default {
                        value: "people".into(),
                    }),
            )
            .with_item(MappingItem {
                source: ItemSource::Key,
                ..MappingItem::attribute("unused", "employeeNumber")
            });

        let identity = identity();
        let resolved = resolver
            .outbound(&identity, &resource(PasswordPropagation::Omit), &mapping)
            .await
            .unwrap();

        assert_eq!(resolved.name, "john.doe");
        assert_eq!(
            resolved.attributes.get("memberOf").map(AttributeValue::texts),
            Some(vec!["staff".to_string(), "ops".to_string()])
        );
        assert_eq!(resolved.attributes.get_string("ou"), Some("people"));
        assert_eq!(
            resolved.attributes.get_string("employeeNumber"),
            Some(identity.key.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_unknown_virtual_is_mapping_error() {
        let mapping = Mapping::new(AnyType::USER, ObjectClass::account())
            .with_item(MappingItem::identifier(ItemSource::Name))
            .with_item(MappingItem {
                source: ItemSource::Virtual {
                    name: "missing".into(),
                },
                ..MappingItem::attribute("unused", "x")
            });
        let err = resolver()
            .outbound(&identity(), &resource(PasswordPropagation::Omit), &mapping)
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::Virtual { .. }));
    }

    #[tokio::test]
    async fn test_remote_name_ignores_other_items() {
        let identity = Identity::new(AnyType::USER, "jdoe");
        let resolver = resolver();

        assert_eq!(resolver.remote_name(&identity, &mapping()).await.unwrap(), "jdoe");
        assert!(matches!(
            resolver
                .outbound(&identity, &resource(PasswordPropagation::Omit), &mapping())
                .await,
            Err(MappingError::MissingMandatory { .. })
        ));
    }

    #[test]
    fn test_inbound_and_apply() {
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe")
            .with_attribute("mail", "jdoe@example.com")
            .with_attribute("sn", "doe")
            .with_attribute(ENABLE, false);

        let values = resolver().inbound(&object, &mapping()).unwrap();
        assert_eq!(values.name.as_deref(), Some("jdoe"));
        assert_eq!(values.enabled, Some(false));
        assert_eq!(values.attributes["email"], vec!["jdoe@example.com"]);
        assert_eq!(values.attributes["surname"], vec!["DOE"]);

        let schemas: BTreeMap<String, AttributeSchema> = [
            AttributeSchema::unique("email"),
            AttributeSchema::single("surname"),
        ]
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect();

        let mut identity = Identity::new(AnyType::USER, "");
        MappingResolver::apply_inbound(&mut identity, &values, &schemas).unwrap();
        assert_eq!(identity.name, "jdoe");
        assert_eq!(identity.status, IdentityStatus::Suspended);
        assert_eq!(
            identity.attribute("email").unwrap().unique_value.as_deref(),
            Some("jdoe@example.com")
        );
        assert_eq!(identity.values("surname"), vec!["DOE"]);
    }

    #[test]
    fn test_inbound_empty_value_clears_attribute() {
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe")
            .with_attribute("mail", "jdoe@example.com")
            .with_attribute("sn", AttributeValue::Null);
        let values = resolver().inbound(&object, &mapping()).unwrap();
        assert!(values.attributes["surname"].is_empty());

        let mut identity = identity();
        MappingResolver::apply_inbound(&mut identity, &values, &BTreeMap::new()).unwrap();
        assert!(identity.attribute("surname").is_none());
    }

    #[test]
    fn test_inbound_partial_object_keeps_omitted_attributes() {
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe")
            .with_attribute("sn", "smith");
        let values = resolver().inbound(&object, &mapping()).unwrap();
        assert!(!values.attributes.contains_key("email"));
        assert_eq!(values.required.get("email").map(String::as_str), Some("mail"));

        let mut identity = identity();
        MappingResolver::apply_inbound(&mut identity, &values, &BTreeMap::new()).unwrap();
        assert_eq!(identity.values("email"), vec!["jdoe@example.com"]);
        assert_eq!(identity.values("surname"), vec!["SMITH"]);
        assert_eq!(identity.values("givenName"), vec!["John"]);

        let mut fresh = Identity::new(AnyType::USER, "");
        let err = MappingResolver::apply_inbound(&mut fresh, &values, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MappingError::MissingMandatory { ref item } if item == "mail"));
    }

    #[test]
    fn test_inbound_default_fills_only_gaps() {
        let mapping = Mapping::new(AnyType::USER, ObjectClass::account())
            .with_item(MappingItem::identifier(ItemSource::Name))
            .with_item(MappingItem::attribute("surname", "sn").with_transform(Transform::Default {
                value: "UNKNOWN".into(),
            }));
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe");
        let values = resolver().inbound(&object, &mapping).unwrap();

        let mut existing = identity();
        MappingResolver::apply_inbound(&mut existing, &values, &BTreeMap::new()).unwrap();
        assert_eq!(existing.values("surname"), vec!["Doe"]);

        let mut fresh = Identity::new(AnyType::USER, "");
        MappingResolver::apply_inbound(&mut fresh, &values, &BTreeMap::new()).unwrap();
        assert_eq!(fresh.values("surname"), vec!["UNKNOWN"]);
    }

    #[test]
    fn test_inbound_unique_attribute_with_several_values_fails() {
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe")
            .with_attribute("mail", AttributeValue::from_texts(vec!["a@x".into(), "b@x".into()]));
        let values = resolver().inbound(&object, &mapping()).unwrap();
        let schemas: BTreeMap<String, AttributeSchema> =
            [("email".to_string(), AttributeSchema::unique("email"))].into_iter().collect();

        let mut identity = Identity::new(AnyType::USER, "");
        let err = MappingResolver::apply_inbound(&mut identity, &values, &schemas).unwrap_err();
        assert!(matches!(err, MappingError::MultipleUniqueValues { count: 2, .. }));
    }

    #[test]
    fn test_correlation_keys() {
        let object = ConnectorObject::new(ObjectClass::account(), Uid::new("u-1"), "jdoe")
            .with_attribute("mail", "jdoe@example.com");
        let keys = resolver().correlation_keys(&object, &mapping()).unwrap();
        assert_eq!(
            keys,
            vec![
                CorrelationKey::Name("jdoe".into()),
                CorrelationKey::Attribute {
                    name: "email".into(),
                    value: "jdoe@example.com".into()
                }
            ]
        );
    }

    #[test]
    fn test_regex_transform() {
        let item = MappingItem::attribute("email", "uid").with_transform(Transform::Regex {
            pattern: r"^([^@]+)@".into(),
            group: 1,
        });
        assert_eq!(
            apply_transforms(&item, vec!["jdoe@example.com".into()]).unwrap(),
            vec!["jdoe"]
        );

        let bad = MappingItem::attribute("email", "uid").with_transform(Transform::Regex {
            pattern: "(".into(),
            group: 0,
        });
        assert!(matches!(
            apply_transforms(&bad, vec!["x".into()]),
            Err(MappingError::Transform { .. })
        ));
    }
}
