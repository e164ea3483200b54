//! Shared fixtures for the provisioning integration tests.
//!
//! [`MockConnector`] keeps remote objects and a change feed in memory, counts
//! every call and can be told to fail or hang on demand.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;

use xavyo_connector::capability::{Capability, CapabilitySet};
use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::mapping::{ItemSource, Mapping, MappingItem};
use xavyo_connector::operation::{
    AttributeSet, ConnectorObject, Filter, OperationOptions, PageRequest, SearchResult, SyncDelta,
    SyncToken, Uid,
};
use xavyo_connector::registry::ConnectorRegistry;
use xavyo_connector::resilience::RetryConfig;
use xavyo_connector::schema::NAME;
use xavyo_connector::traits::{
    Connector, CreateOp, DeleteOp, EnumerateOp, ResultsHandler, SearchOp, SyncOp,
    SyncResultsHandler, UpdateOp,
};
use xavyo_connector::types::{ConnectorId, ObjectClass};
use xavyo_provisioning::{
    ActionRegistry, AnyType, Attribute, AttributeSchema, EngineConfig, Identity, MappingResolver,
    MemoryStore, ReconciliationEngine, Resource, ResourceKey, Store,
};

pub const LDAP: &str = "ldap";
pub const HR: &str = "hr";

/// Enable log output for a test run when `RUST_LOG` is set.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

// =============================================================================
// Mock connector
// =============================================================================

/// In-memory connector with configurable capabilities and failure injection.
pub struct MockConnector {
    name: String,
    capabilities: CapabilitySet,
    objects: Mutex<BTreeMap<Uid, ConnectorObject>>,
    feed: Mutex<Vec<SyncDelta>>,
    /// Remote names whose create/update fails permanently.
    failing_names: Mutex<HashSet<String>>,
    /// Number of upcoming creates that fail with a transient error.
    transient_create_failures: AtomicUsize,
    /// Fail the change feed after delivering this many deltas.
    fail_sync_after: Mutex<Option<usize>>,
    /// Fail enumeration after delivering this many objects.
    fail_enumerate_after: Mutex<Option<usize>>,
    /// Stop responding mid-stream after delivering this many objects or deltas.
    stall_streams_after: Mutex<Option<usize>>,
    offline: AtomicBool,
    hang_create: AtomicBool,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub enumerate_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    /// Attributes received by the last create or update.
    pub last_attributes: Mutex<Option<AttributeSet>>,
}

impl MockConnector {
    /// A connector supporting every operation.
    pub fn new(name: &str) -> Self {
        Self::with_capabilities(
            name,
            &[
                Capability::Create,
                Capability::Update,
                Capability::Delete,
                Capability::Search,
                Capability::Enumerate,
                Capability::Sync,
            ],
        )
    }

    pub fn with_capabilities(name: &str, capabilities: &[Capability]) -> Self {
        Self {
            name: name.to_string(),
            capabilities: CapabilitySet::of(capabilities),
            objects: Mutex::new(BTreeMap::new()),
            feed: Mutex::new(Vec::new()),
            failing_names: Mutex::new(HashSet::new()),
            transient_create_failures: AtomicUsize::new(0),
            fail_sync_after: Mutex::new(None),
            fail_enumerate_after: Mutex::new(None),
            stall_streams_after: Mutex::new(None),
            offline: AtomicBool::new(false),
            hang_create: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            enumerate_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            last_attributes: Mutex::new(None),
        }
    }

    pub fn seed(&self, object: ConnectorObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(object.uid.clone(), object);
    }

    pub fn remove(&self, uid: &str) {
        self.objects.lock().unwrap().remove(&Uid::new(uid));
    }

    pub fn object(&self, uid: &str) -> Option<ConnectorObject> {
        self.objects.lock().unwrap().get(&Uid::new(uid)).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Append a change; its token is its 1-based position in the feed.
    pub fn push_delta(&self, delta: impl FnOnce(SyncToken) -> SyncDelta) {
        let mut feed = self.feed.lock().unwrap();
        let token = SyncToken::new((feed.len() + 1).to_string());
        feed.push(delta(token));
    }

    pub fn fail_name(&self, name: &str) {
        self.failing_names.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_next_creates_transiently(&self, count: usize) {
        self.transient_create_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_sync_after(&self, delivered: Option<usize>) {
        *self.fail_sync_after.lock().unwrap() = delivered;
    }

    pub fn fail_enumerate_after(&self, delivered: Option<usize>) {
        *self.fail_enumerate_after.lock().unwrap() = delivered;
    }

    pub fn stall_streams_after(&self, delivered: Option<usize>) {
        *self.stall_streams_after.lock().unwrap() = delivered;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn hang_creates(&self) {
        self.hang_create.store(true, Ordering::SeqCst);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_failing(&self, name: &str) -> ConnectorResult<()> {
        if self.failing_names.lock().unwrap().contains(name) {
            return Err(ConnectorError::operation_failed(format!(
                "target rejected {name}"
            )));
        }
        Ok(())
    }

    async fn stall_if(&self, delivered: usize) {
        let stall_after = *self.stall_streams_after.lock().unwrap();
        if stall_after == Some(delivered) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    fn feed_position(token: Option<&SyncToken>) -> usize {
        token.and_then(|t| t.value().parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn test(&self) -> ConnectorResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed("connection refused"));
        }
        Ok(())
    }

    fn supported_object_classes(&self) -> Vec<ObjectClass> {
        vec![ObjectClass::account(), ObjectClass::group()]
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    fn as_create(&self) -> Option<&dyn CreateOp> {
        Some(self)
    }

    fn as_update(&self) -> Option<&dyn UpdateOp> {
        Some(self)
    }

    fn as_delete(&self) -> Option<&dyn DeleteOp> {
        Some(self)
    }

    fn as_search(&self) -> Option<&dyn SearchOp> {
        Some(self)
    }

    fn as_enumerate(&self) -> Option<&dyn EnumerateOp> {
        Some(self)
    }

    fn as_sync(&self) -> Option<&dyn SyncOp> {
        Some(self)
    }
}

#[async_trait]
impl CreateOp for MockConnector {
    async fn create(
        &self,
        object_class: &ObjectClass,
        attributes: AttributeSet,
        _options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_create.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let pending = self.transient_create_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_create_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(ConnectorError::connection_failed("connection reset"));
        }

        let name = attributes.get_string(NAME).unwrap_or_default().to_string();
        self.check_failing(&name)?;
        *self.last_attributes.lock().unwrap() = Some(attributes.clone());

        let uid = Uid::new(format!("uid-{name}"));
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&uid) {
            return Err(ConnectorError::already_exists(uid.value()));
        }
        let mut object = ConnectorObject::new(object_class.clone(), uid.clone(), name);
        object.attributes = attributes;
        objects.insert(uid.clone(), object);
        Ok(uid)
    }
}

#[async_trait]
impl UpdateOp for MockConnector {
    async fn update(
        &self,
        _object_class: &ObjectClass,
        uid: &Uid,
        attributes: AttributeSet,
        _options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(uid)
            .ok_or_else(|| ConnectorError::not_found(uid.value()))?;
        self.check_failing(&object.name)?;
        *self.last_attributes.lock().unwrap() = Some(attributes.clone());

        if let Some(name) = attributes.get_string(NAME) {
            object.name = name.to_string();
        }
        for (name, value) in attributes.iter() {
            object.attributes.set(name.clone(), value.clone());
        }
        Ok(uid.clone())
    }
}

#[async_trait]
impl DeleteOp for MockConnector {
    async fn delete(
        &self,
        _object_class: &ObjectClass,
        uid: &Uid,
        _options: &OperationOptions,
    ) -> ConnectorResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .remove(uid)
            .map(|_| ())
            .ok_or_else(|| ConnectorError::not_found(uid.value()))
    }
}

#[async_trait]
impl SearchOp for MockConnector {
    async fn search(
        &self,
        _object_class: &ObjectClass,
        filter: Option<&Filter>,
        _page: &PageRequest,
        _options: &OperationOptions,
    ) -> ConnectorResult<SearchResult> {
        let objects = self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| filter.map_or(true, |f| f.matches(o)))
            .cloned()
            .collect();
        Ok(SearchResult::new(objects))
    }

    /// Matches the remote id or the naming attribute.
    async fn get_object(
        &self,
        _object_class: &ObjectClass,
        uid: &Uid,
        _options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(uid)
            .or_else(|| objects.values().find(|o| o.name == uid.value()))
            .cloned())
    }
}

#[async_trait]
impl EnumerateOp for MockConnector {
    async fn get_all_objects(
        &self,
        _object_class: &ObjectClass,
        handler: &mut dyn ResultsHandler,
        _options: &OperationOptions,
    ) -> ConnectorResult<()> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        let objects: Vec<ConnectorObject> =
            self.objects.lock().unwrap().values().cloned().collect();
        let fail_after = *self.fail_enumerate_after.lock().unwrap();

        for (delivered, object) in objects.into_iter().enumerate() {
            if fail_after == Some(delivered) {
                return Err(ConnectorError::connection_failed("enumeration interrupted"));
            }
            self.stall_if(delivered).await;
            if !handler.handle(object).await {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncOp for MockConnector {
    async fn sync(
        &self,
        _object_class: &ObjectClass,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        _options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<SyncDelta> = self
            .feed
            .lock()
            .unwrap()
            .iter()
            .skip(Self::feed_position(token))
            .cloned()
            .collect();
        let fail_after = *self.fail_sync_after.lock().unwrap();

        let mut last = None;
        for (delivered, delta) in pending.into_iter().enumerate() {
            if fail_after == Some(delivered) {
                return Err(ConnectorError::connection_failed("change feed dropped"));
            }
            self.stall_if(delivered).await;
            let token = delta.token.clone();
            if !handler.handle(delta).await {
                break;
            }
            last = Some(token);
        }
        Ok(last)
    }

    async fn latest_sync_token(
        &self,
        _object_class: &ObjectClass,
    ) -> ConnectorResult<Option<SyncToken>> {
        let feed = self.feed.lock().unwrap();
        Ok(Some(SyncToken::new(feed.len().to_string())))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Fast deadlines and no retries unless a test asks for them.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        call_timeout_ms: 2_000,
        retry: RetryConfig::none(),
        ..EngineConfig::default()
    }
}

/// Retries with millisecond backoff.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// `USER` onto `__ACCOUNT__`: name is the identifier, email is mandatory and
/// both correlate.
pub fn user_mapping() -> Mapping {
    Mapping::new(AnyType::USER, ObjectClass::account())
        .with_item(MappingItem::identifier(ItemSource::Name).correlation())
        .with_item(MappingItem::attribute("email", "mail").mandatory().correlation())
        .with_item(MappingItem::attribute("surname", "sn"))
        .with_item(MappingItem::enable())
}

pub fn user(name: &str, email: &str) -> Identity {
    Identity::new(AnyType::USER, name)
        .with_attribute(Attribute::unique("email", email))
        .with_attribute(Attribute::single("surname", name.to_uppercase()))
}

pub fn remote(uid: &str, name: &str, email: &str) -> ConnectorObject {
    ConnectorObject::new(ObjectClass::account(), Uid::new(uid), name)
        .with_attribute("mail", email)
        .with_attribute("sn", name.to_uppercase())
}

/// Store, connectors and engine wired together.
pub struct Harness {
    pub store: MemoryStore,
    pub connectors: Arc<ConnectorRegistry>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Harness {
    pub async fn new(config: EngineConfig) -> Self {
        Self::build(config, ActionRegistry::new(), None).await
    }

    pub async fn with_actions(config: EngineConfig, actions: ActionRegistry) -> Self {
        Self::build(config, actions, None).await
    }

    pub async fn with_resolver(
        config: EngineConfig,
        resolver: impl FnOnce(Arc<dyn Store>) -> MappingResolver + 'static,
    ) -> Self {
        Self::build(config, ActionRegistry::new(), Some(Box::new(resolver))).await
    }

    async fn build(
        config: EngineConfig,
        actions: ActionRegistry,
        resolver: Option<Box<dyn FnOnce(Arc<dyn Store>) -> MappingResolver>>,
    ) -> Self {
        init_test_logging();
        let store = MemoryStore::new();
        store.register_schema(AttributeSchema::unique("email")).await;
        store.register_schema(AttributeSchema::single("surname")).await;
        store.register_schema(AttributeSchema::multi("department")).await;

        let connectors = Arc::new(ConnectorRegistry::new());
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let resolver = match resolver {
            Some(build) => build(shared.clone()),
            None => MappingResolver::new(shared.clone()),
        };
        let engine = ReconciliationEngine::with_resolver(shared, connectors.clone(), resolver, config)
            .with_actions(actions);

        Self {
            store,
            connectors,
            engine: Arc::new(engine),
        }
    }

    /// Register `connector` and a resource using it with the given mapping.
    pub async fn add_resource_with(
        &self,
        key: &str,
        connector: Arc<MockConnector>,
        resource: impl FnOnce(Resource) -> Resource,
    ) -> Arc<MockConnector> {
        let id = ConnectorId::new();
        self.connectors
            .register(id, connector.clone())
            .await
            .expect("mock connector loads");
        self.store
            .add_resource(resource(Resource::new(key, id)))
            .await;
        connector
    }

    pub async fn add_resource(&self, key: &str, connector: MockConnector) -> Arc<MockConnector> {
        self.add_resource_with(key, Arc::new(connector), |r| r.with_mapping(user_mapping()))
            .await
    }

    pub async fn save(&self, identity: Identity) -> Identity {
        self.store.save(identity).await.expect("identity saves")
    }

    pub async fn reload(&self, identity: &Identity) -> Option<Identity> {
        self.store.find_identity(identity.key).await.unwrap()
    }

    pub async fn by_name(&self, name: &str) -> Option<Identity> {
        self.store.find_by_name(AnyType::USER, name).await.unwrap()
    }

    /// Record `uid` as the identity's remote object on `resource`.
    pub async fn link(&self, identity: Identity, resource: &str, uid: &str) -> Identity {
        let mut identity = identity;
        identity.set_link(&ResourceKey::new(resource), Uid::new(uid));
        self.save(identity).await
    }
}
