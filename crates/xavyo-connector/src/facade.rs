//! Connector façade.
//!
//! [`ConnectorFacade`] is the only way the provisioning engine talks to a
//! connector. It discovers the connector's capabilities and supported object
//! classes once at load time, refuses operations outside that set without
//! invoking the connector, and classifies every failure. It performs no
//! retries and no local persistence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::capability::{Capability, CapabilitySet};
use crate::error::{ConnectorError, ConnectorResult};
use crate::mapping::MappingItem;
use crate::operation::{
    AttributeSet, AttributeValue, ConnectorObject, Filter, OperationOptions, PageRequest,
    SearchResult, SortKey, SyncDelta, SyncToken, Uid,
};
use crate::resilience::{with_idle_deadline, StreamWatch};
use crate::schema::{Schema, NAME, PASSWORD, UID};
use crate::traits::{Connector, ResultsHandler, SyncResultsHandler};
use crate::types::ObjectClass;

/// Default page size when enumeration falls back to paged search.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Capability-checked wrapper around one connector instance.
#[derive(Clone)]
pub struct ConnectorFacade {
    connector: Arc<dyn Connector>,
    capabilities: CapabilitySet,
    object_classes: Vec<ObjectClass>,
    schema: Option<Schema>,
    page_size: u32,
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectorFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorFacade")
            .field("connector", &self.connector.display_name())
            .field("capabilities", &self.capabilities)
            .field("object_classes", &self.object_classes)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl ConnectorFacade {
    /// Load a connector, discovering and caching its capabilities.
    #[instrument(skip(connector), fields(name = %connector.display_name()))]
    pub async fn load(connector: Arc<dyn Connector>) -> ConnectorResult<Self> {
        connector.validate().await?;

        let capabilities = connector.capabilities();
        let object_classes = connector.supported_object_classes();

        let schema = match connector.as_schema() {
            Some(op) => match op.schema().await {
                Ok(schema) => Some(schema),
                Err(e) => {
                    warn!(error = %e, "Schema introspection failed, continuing without schema");
                    None
                }
            },
            None => None,
        };

        debug!(%capabilities, object_classes = object_classes.len(), "Connector loaded");

        Ok(Self {
            connector,
            capabilities,
            object_classes,
            schema,
            page_size: DEFAULT_PAGE_SIZE,
            idle_timeout: None,
        })
    }

    /// Page size used when enumeration is built on paged search.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fail enumeration and change feeds that deliver nothing for this long.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn display_name(&self) -> &str {
        self.connector.display_name()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }

    pub fn object_classes(&self) -> &[ObjectClass] {
        &self.object_classes
    }

    pub fn supports_object_class(&self, object_class: &ObjectClass) -> bool {
        self.object_classes.iter().any(|oc| oc.is(object_class))
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn check_object_class(&self, object_class: &ObjectClass) -> ConnectorResult<()> {
        if self.supports_object_class(object_class) {
            Ok(())
        } else {
            Err(ConnectorError::ObjectClassNotSupported {
                object_class: object_class.to_string(),
            })
        }
    }

    fn require<'a, T: ?Sized>(
        &self,
        capability: Capability,
        op: Option<&'a T>,
    ) -> ConnectorResult<&'a T> {
        if !self.capabilities.supports(capability) {
            return Err(ConnectorError::unsupported(capability));
        }
        op.ok_or(ConnectorError::unsupported(capability))
    }

    /// Test connectivity to the target system.
    pub async fn test(&self) -> ConnectorResult<()> {
        self.connector.test().await
    }

    /// Validate the connector configuration.
    pub async fn validate(&self) -> ConnectorResult<()> {
        self.connector.validate().await
    }

    pub async fn authenticate(
        &self,
        object_class: &ObjectClass,
        username: &str,
        password: &str,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let op = self.require(Capability::Authenticate, self.connector.as_authenticate())?;
        self.check_object_class(object_class)?;
        op.authenticate(object_class, username, password, options)
            .await
    }

    #[instrument(skip(self, attributes, options), fields(connector = %self.display_name(), %object_class))]
    pub async fn create(
        &self,
        object_class: &ObjectClass,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let op = self.require(Capability::Create, self.connector.as_create())?;
        self.check_object_class(object_class)?;
        let uid = op.create(object_class, attributes, options).await?;
        debug!(%uid, "Remote object created");
        Ok(uid)
    }

    #[instrument(skip(self, attributes, options), fields(connector = %self.display_name(), %object_class, %uid))]
    pub async fn update(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let op = self.require(Capability::Update, self.connector.as_update())?;
        self.check_object_class(object_class)?;
        op.update(object_class, uid, attributes, options).await
    }

    #[instrument(skip(self, options), fields(connector = %self.display_name(), %object_class, %uid))]
    pub async fn delete(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<()> {
        let op = self.require(Capability::Delete, self.connector.as_delete())?;
        self.check_object_class(object_class)?;
        op.delete(object_class, uid, options).await
    }

    /// Fetch one object by remote id; absence is `Ok(None)`, not an error.
    pub async fn get_object(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        let op = self.require(Capability::Search, self.connector.as_search())?;
        self.check_object_class(object_class)?;
        match op.get_object(object_class, uid, options).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All attributes of one object, including `__UID__` and `__NAME__`.
    pub async fn get_object_attributes(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<AttributeSet>> {
        Ok(self
            .get_object(object_class, uid, options)
            .await?
            .map(|object| {
                let mut attributes = object.attributes;
                attributes.set(UID, object.uid.value());
                attributes.set(NAME, object.name);
                attributes
            }))
    }

    /// A single attribute of one object.
    pub async fn get_object_attribute(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
        name: &str,
    ) -> ConnectorResult<Option<AttributeValue>> {
        Ok(self
            .get_object_attributes(object_class, uid, options)
            .await?
            .and_then(|mut attributes| attributes.remove(name)))
    }

    /// Fetch one page; resume with the returned cookie.
    pub async fn search(
        &self,
        object_class: &ObjectClass,
        filter: Option<&Filter>,
        page: &PageRequest,
        options: &OperationOptions,
    ) -> ConnectorResult<SearchResult> {
        let op = self.require(Capability::Search, self.connector.as_search())?;
        self.check_object_class(object_class)?;
        op.search(object_class, filter, page, options).await
    }

    /// Drive paged search to exhaustion, handing objects to the handler.
    ///
    /// Stops early when the handler returns `false`.
    #[instrument(skip(self, filter, handler, options), fields(connector = %self.display_name(), %object_class))]
    pub async fn search_all(
        &self,
        object_class: &ObjectClass,
        filter: Option<&Filter>,
        order_by: &[SortKey],
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()> {
        let mut page = PageRequest::new(self.page_size);
        page.order_by = order_by.to_vec();
        let mut pages = 0u32;

        loop {
            let result = self.search(object_class, filter, &page, options).await?;
            pages += 1;
            for object in result.objects {
                if !handler.handle(object).await {
                    debug!(pages, "Search stopped by handler");
                    return Ok(());
                }
            }
            match result.next_cookie {
                Some(cookie) => page.cookie = Some(cookie),
                None => break,
            }
        }

        debug!(pages, "Search exhausted");
        Ok(())
    }

    /// Full enumeration of an object class.
    ///
    /// Uses native enumeration when available, paged search otherwise.
    pub async fn get_all_objects(
        &self,
        object_class: &ObjectClass,
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()> {
        self.check_object_class(object_class)?;
        let watch = StreamWatch::new();
        let mut handler = WatchedHandler {
            inner: handler,
            watch: &watch,
        };
        if let Some(op) = self
            .connector
            .as_enumerate()
            .filter(|_| self.supports(Capability::Enumerate))
        {
            return with_idle_deadline(
                "get_all_objects",
                self.idle_timeout,
                &watch,
                op.get_all_objects(object_class, &mut handler, options),
            )
            .await;
        }
        if self.supports(Capability::Search) {
            return with_idle_deadline(
                "search",
                self.idle_timeout,
                &watch,
                self.search_all(object_class, None, &[], &mut handler, options),
            )
            .await;
        }
        Err(ConnectorError::unsupported(Capability::Enumerate))
    }

    /// Deliver changes after `token`; returns the token to resume from.
    #[instrument(skip(self, handler, options), fields(connector = %self.display_name(), %object_class))]
    pub async fn sync(
        &self,
        object_class: &ObjectClass,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        let op = self.require(Capability::Sync, self.connector.as_sync())?;
        self.check_object_class(object_class)?;
        let watch = StreamWatch::new();
        let mut handler = WatchedHandler {
            inner: handler,
            watch: &watch,
        };
        with_idle_deadline(
            "sync",
            self.idle_timeout,
            &watch,
            op.sync(object_class, token, &mut handler, options),
        )
        .await
    }

    pub async fn latest_sync_token(
        &self,
        object_class: &ObjectClass,
    ) -> ConnectorResult<Option<SyncToken>> {
        let op = self.require(Capability::Sync, self.connector.as_sync())?;
        self.check_object_class(object_class)?;
        op.latest_sync_token(object_class).await
    }

    /// Attribute names over all supported object classes.
    ///
    /// Special `__X__` names are only included when asked for.
    pub fn schema_names(&self, include_special: bool) -> BTreeSet<String> {
        self.schema
            .as_ref()
            .map(|schema| schema.names(&self.object_classes, include_special))
            .unwrap_or_default()
    }

    /// Options requesting exactly the remote attributes of the given items.
    pub fn operation_options<'a>(
        items: impl IntoIterator<Item = &'a MappingItem>,
    ) -> OperationOptions {
        OperationOptions::with_attributes(
            items
                .into_iter()
                .map(MappingItem::remote_attribute_name)
                .filter(|name| *name != PASSWORD),
        )
    }
}

/// Forwards to the caller's handler while recording stream activity.
struct WatchedHandler<'a, H: ?Sized> {
    inner: &'a mut H,
    watch: &'a StreamWatch,
}

#[async_trait]
impl<'a, H: ResultsHandler + ?Sized> ResultsHandler for WatchedHandler<'a, H> {
    async fn handle(&mut self, object: ConnectorObject) -> bool {
        let _busy = self.watch.enter();
        self.inner.handle(object).await
    }
}

#[async_trait]
impl<'a, H: SyncResultsHandler + ?Sized> SyncResultsHandler for WatchedHandler<'a, H> {
    async fn handle(&mut self, delta: SyncDelta) -> bool {
        let _busy = self.watch.enter();
        self.inner.handle(delta).await
    }
}

/// Collects handled objects into a vector.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub objects: Vec<ConnectorObject>,
}

#[async_trait]
impl ResultsHandler for CollectingHandler {
    async fn handle(&mut self, object: ConnectorObject) -> bool {
        self.objects.push(object);
        true
    }
}
