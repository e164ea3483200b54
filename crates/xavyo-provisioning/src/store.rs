//! Identity store interface and the in-memory reference store.
//!
//! The engines only talk to [`Store`]. [`MemoryStore`] keeps everything in
//! process memory behind a single lock and enforces the same rules a durable
//! backend must: validation before persistence, optimistic versioning of
//! identities and sequence-checked sync token replacement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use xavyo_connector::mapping::Mapping;
use xavyo_connector::operation::{SyncToken, Uid};
use xavyo_connector::types::ObjectClass;

use crate::error::{StoreError, StoreResult};
use crate::identity::{AttributeSchema, Identity, IdentityKey, ResourceKey};
use crate::resource::Resource;
use crate::token::SyncTokenRecord;
use crate::validation::validate_identity;

/// Persistence consumed by the propagation and reconciliation engines.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_identity(&self, key: IdentityKey) -> StoreResult<Option<Identity>>;

    /// Identity linked to `uid` on `resource`.
    async fn find_by_resource_link(
        &self,
        resource: &ResourceKey,
        uid: &Uid,
    ) -> StoreResult<Option<Identity>>;

    /// Identities of a type carrying `value` for `attribute` in either slot.
    async fn find_by_attribute(
        &self,
        any_type: &str,
        attribute: &str,
        value: &str,
    ) -> StoreResult<Vec<Identity>>;

    async fn find_by_name(&self, any_type: &str, name: &str) -> StoreResult<Option<Identity>>;

    /// Validate and persist an identity, returning the stored version.
    ///
    /// Fails with [`StoreError::Violations`] before anything is written, and
    /// with [`StoreError::Conflict`] if the stored version moved on.
    async fn save(&self, identity: Identity) -> StoreResult<Identity>;

    async fn delete(&self, key: IdentityKey) -> StoreResult<()>;

    /// Identities holding a link to `resource`.
    async fn list_linked(&self, resource: &ResourceKey) -> StoreResult<Vec<Identity>>;

    async fn list_by_any_type(&self, any_type: &str) -> StoreResult<Vec<Identity>>;

    async fn load_resource(&self, resource: &ResourceKey) -> StoreResult<Resource>;

    async fn load_mapping(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
    ) -> StoreResult<Mapping> {
        let loaded = self.load_resource(resource).await?;
        loaded
            .mapping_for(object_class)
            .cloned()
            .ok_or_else(|| StoreError::not_found("mapping", format!("{resource}/{object_class}")))
    }

    /// Values of a virtual attribute for an identity.
    async fn virtual_values(&self, identity: &Identity, name: &str) -> StoreResult<Vec<String>>;

    /// Registered identity attribute schemas by name.
    async fn attribute_schemas(&self) -> StoreResult<BTreeMap<String, AttributeSchema>>;

    async fn load_sync_token(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
    ) -> StoreResult<Option<SyncTokenRecord>>;

    /// Atomically replace the token.
    ///
    /// `expected_sequence` is the sequence of the record the caller read, or
    /// `None` if it read no record. A mismatch is a [`StoreError::Conflict`]
    /// and leaves the stored token untouched.
    async fn save_sync_token(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
        token: SyncToken,
        expected_sequence: Option<u64>,
    ) -> StoreResult<SyncTokenRecord>;
}

/// Computes a virtual attribute from an identity.
pub type VirtualAttribute = Arc<dyn Fn(&Identity) -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    identities: HashMap<IdentityKey, Identity>,
    resources: HashMap<ResourceKey, Resource>,
    schemas: BTreeMap<String, AttributeSchema>,
    virtuals: HashMap<String, VirtualAttribute>,
    tokens: HashMap<(ResourceKey, String), SyncTokenRecord>,
}

fn token_key(resource: &ResourceKey, object_class: &ObjectClass) -> (ResourceKey, String) {
    (resource.clone(), object_class.as_str().to_ascii_uppercase())
}

/// In-memory [`Store`].
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_schema(&self, schema: AttributeSchema) {
        let mut state = self.state.write().await;
        state.schemas.insert(schema.name.clone(), schema);
    }

    pub async fn add_resource(&self, resource: Resource) {
        let mut state = self.state.write().await;
        state.resources.insert(resource.key.clone(), resource);
    }

    pub async fn register_virtual<F>(&self, name: impl Into<String>, compute: F)
    where
        F: Fn(&Identity) -> Vec<String> + Send + Sync + 'static,
    {
        let mut state = self.state.write().await;
        state.virtuals.insert(name.into(), Arc::new(compute));
    }

    pub async fn identity_count(&self) -> usize {
        self.state.read().await.identities.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_identity(&self, key: IdentityKey) -> StoreResult<Option<Identity>> {
        Ok(self.state.read().await.identities.get(&key).cloned())
    }

    async fn find_by_resource_link(
        &self,
        resource: &ResourceKey,
        uid: &Uid,
    ) -> StoreResult<Option<Identity>> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .find(|identity| identity.link(resource).is_some_and(|link| &link.uid == uid))
            .cloned())
    }

    async fn find_by_attribute(
        &self,
        any_type: &str,
        attribute: &str,
        value: &str,
    ) -> StoreResult<Vec<Identity>> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .filter(|identity| identity.any_type == any_type)
            .filter(|identity| {
                identity
                    .attribute(attribute)
                    .is_some_and(|attr| attr.all_values().contains(&value))
            })
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, any_type: &str, name: &str) -> StoreResult<Option<Identity>> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .find(|identity| identity.any_type == any_type && identity.name == name)
            .cloned())
    }

    async fn save(&self, mut identity: Identity) -> StoreResult<Identity> {
        let mut state = self.state.write().await;

        let violations = validate_identity(&identity, &state.schemas);
        if !violations.is_empty() {
            return Err(StoreError::Violations(violations));
        }

        let stored_version = state.identities.get(&identity.key).map(|i| i.version);
        match stored_version {
            Some(version) if version != identity.version => {
                return Err(StoreError::conflict(format!(
                    "identity {} is at version {}, save was based on {}",
                    identity.key, version, identity.version
                )));
            }
            None if identity.version != 0 => {
                return Err(StoreError::not_found("identity", identity.key));
            }
            _ => {}
        }

        let duplicate = state.identities.values().any(|other| {
            other.key != identity.key
                && other.any_type == identity.any_type
                && other.name == identity.name
        });
        if duplicate {
            return Err(StoreError::conflict(format!(
                "{} '{}' already exists",
                identity.any_type, identity.name
            )));
        }

        identity.version += 1;
        identity.updated_at = Utc::now();
        debug!(identity = %identity.key, version = identity.version, "Identity saved");
        state.identities.insert(identity.key, identity.clone());
        Ok(identity)
    }

    async fn delete(&self, key: IdentityKey) -> StoreResult<()> {
        self.state
            .write()
            .await
            .identities
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("identity", key))
    }

    async fn list_linked(&self, resource: &ResourceKey) -> StoreResult<Vec<Identity>> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .filter(|identity| identity.link(resource).is_some())
            .cloned()
            .collect())
    }

    async fn list_by_any_type(&self, any_type: &str) -> StoreResult<Vec<Identity>> {
        let state = self.state.read().await;
        let mut identities: Vec<Identity> = state
            .identities
            .values()
            .filter(|identity| identity.any_type == any_type)
            .cloned()
            .collect();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(identities)
    }

    async fn load_resource(&self, resource: &ResourceKey) -> StoreResult<Resource> {
        self.state
            .read()
            .await
            .resources
            .get(resource)
            .cloned()
            .ok_or_else(|| StoreError::not_found("resource", resource))
    }

    async fn virtual_values(&self, identity: &Identity, name: &str) -> StoreResult<Vec<String>> {
        let compute = self
            .state
            .read()
            .await
            .virtuals
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("virtual attribute", name))?;
        Ok(compute(identity))
    }

    async fn attribute_schemas(&self) -> StoreResult<BTreeMap<String, AttributeSchema>> {
        Ok(self.state.read().await.schemas.clone())
    }

    async fn load_sync_token(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
    ) -> StoreResult<Option<SyncTokenRecord>> {
        Ok(self
            .state
            .read()
            .await
            .tokens
            .get(&token_key(resource, object_class))
            .cloned())
    }

    async fn save_sync_token(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
        token: SyncToken,
        expected_sequence: Option<u64>,
    ) -> StoreResult<SyncTokenRecord> {
        let mut state = self.state.write().await;
        let key = token_key(resource, object_class);
        let current = state.tokens.get(&key);

        let record = match (current, expected_sequence) {
            (None, None) => SyncTokenRecord::new(resource.clone(), object_class.clone(), token),
            (Some(current), Some(expected)) if current.sequence == expected => {
                current.advance(token)
            }
            (current, expected) => {
                return Err(StoreError::conflict(format!(
                    "sync token for {resource}/{object_class} is at sequence {:?}, expected {:?}",
                    current.map(|c| c.sequence),
                    expected
                )));
            }
        };

        state.tokens.insert(key, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AnyType, Attribute};
    use crate::validation::ViolationKind;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.register_schema(AttributeSchema::unique("email")).await;
        store.register_schema(AttributeSchema::single("surname")).await;
        store
    }

    #[tokio::test]
    async fn test_save_rejects_unique_with_general_values() {
        let store = store().await;
        let identity = Identity::new(AnyType::USER, "jdoe").with_attribute(Attribute {
            schema: "email".into(),
            values: vec!["x@example.com".into()],
            unique_value: Some("jdoe@example.com".into()),
        });

        match store.save(identity).await {
            Err(StoreError::Violations(v)) => {
                assert_eq!(v[0].kind, ViolationKind::UniqueWithGeneralValues);
            }
            other => panic!("expected violations, got {other:?}"),
        }
        assert_eq!(store.identity_count().await, 0);
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_conflict() {
        let store = store().await;
        let saved = store
            .save(Identity::new(AnyType::USER, "jdoe"))
            .await
            .unwrap();
        assert_eq!(saved.version, 1);

        let again = store.save(saved.clone()).await.unwrap();
        assert_eq!(again.version, 2);

        let stale = store.save(saved).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = store().await;
        store.save(Identity::new(AnyType::USER, "jdoe")).await.unwrap();
        let dup = store.save(Identity::new(AnyType::USER, "jdoe")).await;
        assert!(matches!(dup, Err(StoreError::Conflict { .. })));
        // Same name under another type is fine.
        store.save(Identity::new(AnyType::GROUP, "jdoe")).await.unwrap();
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = store().await;
        let ldap = ResourceKey::new("ldap");
        let mut identity = Identity::new(AnyType::USER, "jdoe")
            .with_attribute(Attribute::unique("email", "jdoe@example.com"));
        identity.set_link(&ldap, Uid::new("cn=jdoe"));
        let saved = store.save(identity).await.unwrap();

        let found = store
            .find_by_resource_link(&ldap, &Uid::new("cn=jdoe"))
            .await
            .unwrap();
        assert_eq!(found.unwrap().key, saved.key);

        let found = store
            .find_by_attribute(AnyType::USER, "email", "jdoe@example.com")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        assert_eq!(store.list_linked(&ldap).await.unwrap().len(), 1);
        assert!(store
            .list_linked(&ResourceKey::new("db"))
            .await
            .unwrap()
            .is_empty());

        store.delete(saved.key).await.unwrap();
        assert!(store.find_identity(saved.key).await.unwrap().is_none());
        assert!(store.delete(saved.key).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_token_sequence_check() {
        let store = MemoryStore::new();
        let ldap = ResourceKey::new("ldap");
        let oc = ObjectClass::account();

        let first = store
            .save_sync_token(&ldap, &oc, SyncToken::new("1"), None)
            .await
            .unwrap();
        assert_eq!(first.sequence, 1);

        let conflict = store
            .save_sync_token(&ldap, &oc, SyncToken::new("x"), None)
            .await;
        assert!(matches!(conflict, Err(StoreError::Conflict { .. })));

        let second = store
            .save_sync_token(&ldap, &oc, SyncToken::new("2"), Some(1))
            .await
            .unwrap();
        assert_eq!(second.sequence, 2);

        let stale = store
            .save_sync_token(&ldap, &oc, SyncToken::new("3"), Some(1))
            .await;
        assert!(stale.is_err());

        let loaded = store
            .load_sync_token(&ldap, &ObjectClass::new("__account__"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.token.value(), "2");
    }

    #[tokio::test]
    async fn test_virtual_values() {
        let store = MemoryStore::new();
        store
            .register_virtual("displayName", |identity: &Identity| {
                vec![identity.name.to_uppercase()]
            })
            .await;

        let identity = Identity::new(AnyType::USER, "jdoe");
        assert_eq!(
            store.virtual_values(&identity, "displayName").await.unwrap(),
            vec!["JDOE"]
        );
        assert!(store.virtual_values(&identity, "missing").await.is_err());
    }
}
