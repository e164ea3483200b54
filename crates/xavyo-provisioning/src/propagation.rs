//! Propagation of identities to resources.
//!
//! For each (identity, resource) pair the engine resolves the outbound
//! attributes, decides between create, update and delete from the stored
//! resource link or a remote lookup, issues the call under the configured
//! [`CallPolicy`] and records the outcome. Failures are isolated per pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use xavyo_connector::capability::Capability;
use xavyo_connector::error::{ConnectorError, ErrorClass};
use xavyo_connector::facade::ConnectorFacade;
use xavyo_connector::mapping::Mapping;
use xavyo_connector::operation::{OperationOptions, Uid};
use xavyo_connector::registry::ConnectorRegistry;
use xavyo_connector::resilience::CallPolicy;
use xavyo_connector::types::{ObjectClass, OperationType};

use crate::config::EngineConfig;
use crate::error::{FailureKind, MappingError, RecordError, StoreError};
use crate::identity::{Identity, IdentityKey, ResourceKey};
use crate::resolver::{MappingResolver, ResolvedAttributes};
use crate::resource::Resource;
use crate::store::Store;
use crate::validation::validate_identity;

/// Result status of one propagation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationStatus {
    Success,
    Failure,
    /// The connector lacks the capability for the operation.
    NotAttempted,
}

/// Why a pair failed or was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&RecordError> for OutcomeDetail {
    fn from(error: &RecordError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome for one (identity, resource) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationOutcome {
    pub identity: IdentityKey,
    pub resource: ResourceKey,
    /// The operation chosen or requested; `None` if none could be decided.
    pub operation: Option<OperationType>,
    pub status: PropagationStatus,
    /// Remote id after a successful create or update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<OutcomeDetail>,
}

impl PropagationOutcome {
    fn success(
        identity: IdentityKey,
        resource: &ResourceKey,
        operation: OperationType,
        uid: Option<Uid>,
    ) -> Self {
        Self {
            identity,
            resource: resource.clone(),
            operation: Some(operation),
            status: PropagationStatus::Success,
            uid,
            detail: None,
        }
    }

    fn failure(
        identity: IdentityKey,
        resource: &ResourceKey,
        operation: Option<OperationType>,
        error: &RecordError,
    ) -> Self {
        Self {
            identity,
            resource: resource.clone(),
            operation,
            status: PropagationStatus::Failure,
            uid: None,
            detail: Some(error.into()),
        }
    }

    fn not_attempted(
        identity: IdentityKey,
        resource: &ResourceKey,
        operation: OperationType,
        capability: Capability,
    ) -> Self {
        Self {
            identity,
            resource: resource.clone(),
            operation: Some(operation),
            status: PropagationStatus::NotAttempted,
            uid: None,
            detail: Some(OutcomeDetail {
                kind: FailureKind::Connector(ErrorClass::CapabilityUnsupported),
                message: format!("connector does not support {capability}"),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PropagationStatus::Success
    }
}

/// A request to propagate one identity to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationRequest {
    pub identity: IdentityKey,
    pub resource: ResourceKey,
    /// Forces the operation instead of inferring it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationType>,
}

impl PropagationRequest {
    pub fn new(identity: IdentityKey, resource: ResourceKey) -> Self {
        Self {
            identity,
            resource,
            operation: None,
        }
    }

    #[must_use]
    pub fn forced(mut self, operation: OperationType) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Aggregated result of a bulk propagation, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPropagationResult {
    pub outcomes: Vec<PropagationOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl BulkPropagationResult {
    pub fn from_outcomes(outcomes: Vec<PropagationOutcome>) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            succeeded: count(PropagationStatus::Success),
            failed: count(PropagationStatus::Failure),
            not_attempted: count(PropagationStatus::NotAttempted),
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PropagationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == PropagationStatus::Failure)
    }
}

/// Everything needed to propagate to one resource, loaded once.
#[derive(Debug, Clone)]
pub struct PropagationTarget {
    pub resource: Resource,
    pub facade: Arc<ConnectorFacade>,
    pub mapping: Mapping,
}

/// Drives create/update/delete of remote objects for identities.
pub struct PropagationEngine {
    store: Arc<dyn Store>,
    connectors: Arc<ConnectorRegistry>,
    resolver: MappingResolver,
    policy: CallPolicy,
    worker_count: usize,
    link_locks: Mutex<HashMap<IdentityKey, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for PropagationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationEngine")
            .field("policy", &self.policy)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl PropagationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        connectors: Arc<ConnectorRegistry>,
        resolver: MappingResolver,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            connectors,
            resolver,
            policy: config.call_policy(),
            worker_count: config.worker_count.max(1),
            link_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load resource, connector and the mapping for an identity type.
    pub async fn target(
        &self,
        resource: &ResourceKey,
        any_type: &str,
    ) -> Result<PropagationTarget, RecordError> {
        let resource = self.store.load_resource(resource).await?;
        let facade = self
            .connectors
            .get(&resource.connector)
            .await
            .ok_or_else(|| ConnectorError::InvalidConfiguration {
                message: format!("connector {} is not registered", resource.connector),
            })?;
        let mapping = resource
            .mapping_for_any_type(any_type)
            .cloned()
            .ok_or_else(|| {
                MappingError::invalid(format!(
                    "resource {} has no mapping for {any_type}",
                    resource.key
                ))
            })?;

        Ok(PropagationTarget {
            resource,
            facade,
            mapping,
        })
    }

    /// Propagate one identity to one resource.
    #[instrument(skip(self, request), fields(identity = %request.identity, resource = %request.resource))]
    pub async fn propagate(&self, request: &PropagationRequest) -> PropagationOutcome {
        match self.prepare(request).await {
            Ok((identity, target)) => {
                self.propagate_identity(&identity, &target, request.operation)
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Propagation rejected before any remote call");
                PropagationOutcome::failure(request.identity, &request.resource, request.operation, &e)
            }
        }
    }

    async fn prepare(
        &self,
        request: &PropagationRequest,
    ) -> Result<(Identity, PropagationTarget), RecordError> {
        let identity = self
            .store
            .find_identity(request.identity)
            .await?
            .ok_or_else(|| StoreError::not_found("identity", request.identity))?;

        let violations = validate_identity(&identity, &self.store.attribute_schemas().await?);
        if !violations.is_empty() {
            return Err(StoreError::Violations(violations).into());
        }

        let target = self.target(&request.resource, &identity.any_type).await?;
        Ok((identity, target))
    }

    /// Propagate many pairs, at most `worker_count` at a time.
    ///
    /// Every request is attempted; outcomes keep request order.
    pub async fn propagate_bulk(&self, requests: &[PropagationRequest]) -> BulkPropagationResult {
        let outcomes: Vec<PropagationOutcome> = stream::iter(requests)
            .map(|request| self.propagate(request))
            .buffered(self.worker_count)
            .collect()
            .await;

        let result = BulkPropagationResult::from_outcomes(outcomes);
        info!(
            requested = requests.len(),
            succeeded = result.succeeded,
            failed = result.failed,
            not_attempted = result.not_attempted,
            "Bulk propagation finished"
        );
        result
    }

    /// Propagate a loaded identity to a loaded target.
    pub async fn propagate_identity(
        &self,
        identity: &Identity,
        target: &PropagationTarget,
        forced: Option<OperationType>,
    ) -> PropagationOutcome {
        let resource = &target.resource.key;
        let facade: &ConnectorFacade = &target.facade;
        let object_class = &target.mapping.object_class;
        let options = ConnectorFacade::operation_options(target.mapping.outbound_items());
        let linked = identity.link(resource).map(|link| link.uid.clone());
        let fail = |operation, error: RecordError| {
            warn!(identity = %identity.key, %resource, error = %error, "Propagation failed");
            PropagationOutcome::failure(identity.key, resource, operation, &error)
        };

        // A delete needs no attribute values, at most the name to look it up by.
        let resolved = if forced == Some(OperationType::Delete) {
            None
        } else {
            match self
                .resolver
                .outbound(identity, &target.resource, &target.mapping)
                .await
            {
                Ok(resolved) => Some(resolved),
                Err(e) => return fail(forced, e.into()),
            }
        };

        let existing = match linked {
            Some(uid) => Some(uid),
            None if forced == Some(OperationType::Create) => None,
            None => {
                let name = match &resolved {
                    Some(resolved) => resolved.name.clone(),
                    None => match self.resolver.remote_name(identity, &target.mapping).await {
                        Ok(name) => name,
                        Err(e) => return fail(forced, e.into()),
                    },
                };
                match self.lookup(facade, target, &name, &options).await {
                    Ok(found) => found,
                    Err(e) => return fail(forced, e.into()),
                }
            }
        };

        let operation = match (forced, &existing) {
            (Some(OperationType::Delete), _) => OperationType::Delete,
            (Some(OperationType::Create), _) | (_, None) => OperationType::Create,
            (_, Some(_)) => OperationType::Update,
        };

        let capability = match operation {
            OperationType::Create => Capability::Create,
            OperationType::Update => Capability::Update,
            OperationType::Delete => Capability::Delete,
        };

        if operation == OperationType::Delete && existing.is_none() {
            debug!(identity = %identity.key, %resource, "Remote object already absent");
            return PropagationOutcome::success(identity.key, resource, operation, None);
        }

        if !facade.supports(capability) {
            debug!(identity = %identity.key, %resource, %capability, "Operation not attempted");
            return PropagationOutcome::not_attempted(identity.key, resource, operation, capability);
        }

        debug!(identity = %identity.key, %resource, %operation, "Propagating");
        let result = self
            .invoke(facade, object_class, operation, existing.as_ref(), resolved.as_ref(), &options)
            .await;

        match result {
            Ok(uid) => {
                if let Err(e) = self.record_link(identity.key, resource, uid.clone()).await {
                    return fail(Some(operation), e.into());
                }
                PropagationOutcome::success(identity.key, resource, operation, uid)
            }
            Err(e) if e.class() == ErrorClass::CapabilityUnsupported => {
                PropagationOutcome::not_attempted(identity.key, resource, operation, capability)
            }
            Err(e) => fail(Some(operation), e.into()),
        }
    }

    /// Look for the remote object by its resolved name.
    ///
    /// A connector without search cannot tell; the object is assumed absent.
    async fn lookup(
        &self,
        facade: &ConnectorFacade,
        target: &PropagationTarget,
        name: &str,
        options: &OperationOptions,
    ) -> Result<Option<Uid>, ConnectorError> {
        if !facade.supports(Capability::Search) {
            return Ok(None);
        }
        let object_class = &target.mapping.object_class;
        let uid = Uid::new(name);
        let uid = &uid;
        let found = self
            .policy
            .execute("get_object", move || facade.get_object(object_class, uid, options))
            .await?;
        Ok(found.map(|object| object.uid))
    }

    /// Issue the remote call; returns the remote id to link, `None` to unlink.
    async fn invoke(
        &self,
        facade: &ConnectorFacade,
        object_class: &ObjectClass,
        operation: OperationType,
        existing: Option<&Uid>,
        resolved: Option<&ResolvedAttributes>,
        options: &OperationOptions,
    ) -> Result<Option<Uid>, ConnectorError> {
        let attributes = resolved.map(|r| &r.attributes);
        match (operation, existing, attributes) {
            (OperationType::Create, _, Some(attributes)) => self
                .policy
                .execute("create", move || {
                    facade.create(object_class, attributes.clone(), options)
                })
                .await
                .map(Some),
            (OperationType::Update, Some(uid), Some(attributes)) => self
                .policy
                .execute("update", move || {
                    facade.update(object_class, uid, attributes.clone(), options)
                })
                .await
                .map(Some),
            (OperationType::Delete, Some(uid), _) => {
                match self
                    .policy
                    .execute("delete", move || facade.delete(object_class, uid, options))
                    .await
                {
                    Ok(()) => Ok(None),
                    Err(e) if e.is_not_found() => {
                        debug!(%uid, "Remote object already deleted");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Err(ConnectorError::internal(format!(
                "no input for {operation} operation"
            ))),
        }
    }

    /// Update the identity's link, serialized per identity.
    async fn record_link(
        &self,
        identity: IdentityKey,
        resource: &ResourceKey,
        uid: Option<Uid>,
    ) -> Result<(), StoreError> {
        let result = {
            let lock = self.link_lock(identity);
            let _guard = lock.lock().await;
            self.save_link(identity, resource, uid).await
        };
        self.release_link_lock(identity);
        result
    }

    async fn save_link(
        &self,
        identity: IdentityKey,
        resource: &ResourceKey,
        uid: Option<Uid>,
    ) -> Result<(), StoreError> {
        let Some(mut current) = self.store.find_identity(identity).await? else {
            // Deleted meanwhile; nothing left to link.
            return Ok(());
        };

        match uid {
            Some(uid) => {
                if current.link(resource).is_some_and(|link| link.uid == uid) {
                    return Ok(());
                }
                current.set_link(resource, uid);
            }
            None => {
                if !current.unlink(resource) {
                    return Ok(());
                }
            }
        }

        self.store.save(current).await?;
        Ok(())
    }

    fn link_lock(&self, identity: IdentityKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .link_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(identity).or_default().clone()
    }

    fn release_link_lock(&self, identity: IdentityKey) {
        let mut locks = self
            .link_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&identity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&identity);
        }
    }
}
