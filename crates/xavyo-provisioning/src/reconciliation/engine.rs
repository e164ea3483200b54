//! Reconciliation engine orchestrator.
//!
//! Main entry point for pull and push runs. Every run goes through
//! `INIT -> FETCHING -> APPLYING -> (COMMITTED | FAILED)` and always yields a
//! [`RunSummary`]; per-record failures are collected in the summary and never
//! abort the run.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use xavyo_connector::capability::Capability;
use xavyo_connector::error::{ConnectorError, ErrorClass};
use xavyo_connector::facade::ConnectorFacade;
use xavyo_connector::mapping::Mapping;
use xavyo_connector::operation::{
    ConnectorObject, OperationOptions, SyncDelta, SyncDeltaType, SyncToken, Uid,
};
use xavyo_connector::registry::ConnectorRegistry;
use xavyo_connector::resilience::{with_deadline, CallPolicy};
use xavyo_connector::traits::{ResultsHandler, SyncResultsHandler};
use xavyo_connector::types::{ObjectClass, OperationType};

use super::actions::{ActionDecision, ActionError, ActionRegistry, PushActions, SyncActions};
use super::summary::RunSummary;
use super::types::{Direction, PullRecord, RecordAction, RunState, SyncMode};
use crate::config::{DeleteUnmatched, EngineConfig};
use crate::error::{
    FailureKind, MappingError, ProvisioningError, ProvisioningResult, RecordError, StoreError,
};
use crate::identity::{AttributeSchema, Identity, IdentityKey, ResourceKey};
use crate::propagation::{OutcomeDetail, PropagationEngine, PropagationStatus, PropagationTarget};
use crate::resolver::{CorrelationKey, MappingResolver};
use crate::resource::Resource;
use crate::store::Store;
use crate::token::SyncTokenRecord;
use crate::validation::{validate_identity, Violation, ViolationKind};

/// A pull run: remote state into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullTask {
    pub resource: ResourceKey,
    pub object_class: ObjectClass,
    #[serde(default)]
    pub mode: SyncMode,
    /// Registered sync action names, invoked in order.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl PullTask {
    pub fn new(resource: impl Into<String>, object_class: ObjectClass, mode: SyncMode) -> Self {
        Self {
            resource: ResourceKey::new(resource),
            object_class,
            mode,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.actions.push(name.into());
        self
    }
}

/// Which identities a push run propagates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushTargets {
    /// Every identity of the mapping's type.
    #[default]
    All,
    Only(Vec<IdentityKey>),
}

/// A push run: store state onto the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTask {
    pub resource: ResourceKey,
    pub object_class: ObjectClass,
    #[serde(default)]
    pub targets: PushTargets,
    /// Registered push action names, invoked in order.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl PushTask {
    pub fn all(resource: impl Into<String>, object_class: ObjectClass) -> Self {
        Self {
            resource: ResourceKey::new(resource),
            object_class,
            targets: PushTargets::All,
            actions: Vec::new(),
        }
    }

    pub fn only(
        resource: impl Into<String>,
        object_class: ObjectClass,
        identities: Vec<IdentityKey>,
    ) -> Self {
        Self {
            targets: PushTargets::Only(identities),
            ..Self::all(resource, object_class)
        }
    }

    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.actions.push(name.into());
        self
    }
}

/// Everything a pull run loads at INIT.
struct PullContext {
    resource: Resource,
    object_class: ObjectClass,
    facade: Arc<ConnectorFacade>,
    mapping: Mapping,
    actions: Vec<(String, Arc<dyn SyncActions>)>,
    schemas: BTreeMap<String, AttributeSchema>,
    options: OperationOptions,
}

struct PushContext {
    target: PropagationTarget,
    actions: Vec<(String, Arc<dyn PushActions>)>,
    schemas: BTreeMap<String, AttributeSchema>,
}

type RunKey = (ResourceKey, String);

/// Marks a (resource, object class) pair busy until dropped.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<RunKey>>,
    key: RunKey,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Reconciliation engine for orchestrating pull and push runs.
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    connectors: Arc<ConnectorRegistry>,
    propagation: Arc<PropagationEngine>,
    resolver: MappingResolver,
    actions: Arc<ActionRegistry>,
    config: EngineConfig,
    policy: CallPolicy,
    running: Mutex<HashSet<RunKey>>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.config)
            .field("actions", &self.actions)
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Create an engine with a resolver that cannot decrypt passwords.
    pub fn new(
        store: Arc<dyn Store>,
        connectors: Arc<ConnectorRegistry>,
        config: EngineConfig,
    ) -> Self {
        let resolver = MappingResolver::new(store.clone());
        Self::with_resolver(store, connectors, resolver, config)
    }

    pub fn with_resolver(
        store: Arc<dyn Store>,
        connectors: Arc<ConnectorRegistry>,
        resolver: MappingResolver,
        config: EngineConfig,
    ) -> Self {
        let propagation = Arc::new(PropagationEngine::new(
            store.clone(),
            connectors.clone(),
            resolver.clone(),
            &config,
        ));
        Self {
            store,
            connectors,
            propagation,
            resolver,
            actions: Arc::new(ActionRegistry::new()),
            policy: config.call_policy(),
            config,
            running: Mutex::new(HashSet::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    /// The propagation engine used by push runs.
    pub fn propagation(&self) -> &Arc<PropagationEngine> {
        &self.propagation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop accepting runs; in-flight runs fail as interrupted at the next record.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        info!("Reconciliation engine shutting down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Check a pull task before running it.
    pub async fn validate_pull_task(&self, task: &PullTask) -> Vec<Violation> {
        let mut violations = self.validate_resource(&task.resource).await;
        violations.extend(
            task.actions
                .iter()
                .filter(|name| !self.actions.has_sync(name))
                .map(|name| {
                    Violation::new(
                        "actions",
                        ViolationKind::UnknownAction,
                        format!("no pull action registered as '{name}'"),
                    )
                }),
        );
        violations
    }

    /// Check a push task before running it.
    pub async fn validate_push_task(&self, task: &PushTask) -> Vec<Violation> {
        let mut violations = self.validate_resource(&task.resource).await;
        violations.extend(
            task.actions
                .iter()
                .filter(|name| !self.actions.has_push(name))
                .map(|name| {
                    Violation::new(
                        "actions",
                        ViolationKind::UnknownAction,
                        format!("no push action registered as '{name}'"),
                    )
                }),
        );
        violations
    }

    async fn validate_resource(&self, resource: &ResourceKey) -> Vec<Violation> {
        match self.store.load_resource(resource).await {
            Err(StoreError::NotFound { .. }) => vec![Violation::new(
                "resource",
                ViolationKind::UnknownResource,
                format!("resource {resource} does not exist"),
            )],
            // Backend failures surface when the run loads the resource.
            _ => Vec::new(),
        }
    }

    /// Run a pull task to completion.
    #[instrument(skip_all, fields(resource = %task.resource, object_class = %task.object_class, mode = %task.mode))]
    pub async fn run_pull(&self, task: &PullTask) -> RunSummary {
        let mut summary =
            RunSummary::new(&task.resource, &task.object_class, Direction::Pull, task.mode);
        info!(run_id = %summary.run_id, "Pull run started");

        let result = match self.claim(&task.resource, &task.object_class) {
            Ok(_guard) => self.pull(task, &mut summary).await,
            Err(e) => Err(e),
        };
        Self::finish(&mut summary, result);
        summary
    }

    /// Run a push task to completion.
    #[instrument(skip_all, fields(resource = %task.resource, object_class = %task.object_class))]
    pub async fn run_push(&self, task: &PushTask) -> RunSummary {
        let mut summary = RunSummary::new(
            &task.resource,
            &task.object_class,
            Direction::Push,
            SyncMode::Full,
        );
        info!(run_id = %summary.run_id, "Push run started");

        let result = match self.claim(&task.resource, &task.object_class) {
            Ok(_guard) => self.push(task, &mut summary).await,
            Err(e) => Err(e),
        };
        Self::finish(&mut summary, result);
        summary
    }

    fn finish(summary: &mut RunSummary, result: ProvisioningResult<Option<SyncToken>>) {
        match result {
            Ok(token) => {
                summary.commit(token);
                info!(
                    run_id = %summary.run_id,
                    processed = summary.counts.processed,
                    created = summary.counts.created,
                    updated = summary.counts.updated,
                    deleted = summary.counts.deleted,
                    unlinked = summary.counts.unlinked,
                    skipped = summary.counts.skipped,
                    failed = summary.counts.failed,
                    not_attempted = summary.counts.not_attempted,
                    duration_ms = summary.duration_ms().unwrap_or_default(),
                    "Run committed"
                );
            }
            Err(e) => {
                error!(
                    run_id = %summary.run_id,
                    code = e.error_code(),
                    error = %e,
                    processed = summary.counts.processed,
                    "Run failed"
                );
                summary.fail(&e);
            }
        }
    }

    fn claim(
        &self,
        resource: &ResourceKey,
        object_class: &ObjectClass,
    ) -> ProvisioningResult<RunGuard<'_>> {
        let key = (resource.clone(), object_class.as_str().to_ascii_uppercase());
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.clone()) {
            return Err(ProvisioningError::AlreadyRunning {
                resource: resource.to_string(),
                object_class: object_class.to_string(),
            });
        }
        Ok(RunGuard {
            running: &self.running,
            key,
        })
    }

    fn ensure_running(&self) -> ProvisioningResult<()> {
        if self.is_shut_down() {
            return Err(ProvisioningError::Interrupted);
        }
        Ok(())
    }

    async fn load_resource(&self, resource: &ResourceKey) -> ProvisioningResult<Resource> {
        self.store
            .load_resource(resource)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => ProvisioningError::ResourceNotFound {
                    resource: resource.to_string(),
                },
                other => ProvisioningError::Store(other),
            })
    }

    /// Look up the resource's connector and check it answers.
    async fn connect(&self, resource: &Resource) -> ProvisioningResult<Arc<ConnectorFacade>> {
        let connectivity = |source| ProvisioningError::Connectivity {
            resource: resource.key.to_string(),
            source,
        };

        let facade = self
            .connectors
            .get(&resource.connector)
            .await
            .ok_or_else(|| {
                connectivity(ConnectorError::InvalidConfiguration {
                    message: format!("connector {} is not registered", resource.connector),
                })
            })?;

        let loaded: &ConnectorFacade = &facade;
        self.policy
            .execute("test", move || loaded.test())
            .await
            .map_err(connectivity)?;
        Ok(facade)
    }

    fn mapping(
        resource: &Resource,
        object_class: &ObjectClass,
        facade: &ConnectorFacade,
    ) -> ProvisioningResult<Mapping> {
        let mapping_error = |message: String| ProvisioningError::Mapping {
            resource: resource.key.to_string(),
            object_class: object_class.to_string(),
            message,
        };

        let mapping = resource
            .mapping_for(object_class)
            .cloned()
            .ok_or_else(|| mapping_error("no mapping for object class".to_string()))?;

        let problems = mapping.problems();
        if !problems.is_empty() {
            return Err(mapping_error(problems.join("; ")));
        }
        if !facade.supports_object_class(object_class) {
            return Err(mapping_error(format!(
                "connector {} does not handle the object class",
                facade.display_name()
            )));
        }
        Ok(mapping)
    }

    async fn pull_context(&self, task: &PullTask) -> ProvisioningResult<PullContext> {
        let resource = self.load_resource(&task.resource).await?;
        let facade = Arc::new(
            self.connect(&resource)
                .await?
                .as_ref()
                .clone()
                .with_page_size(self.config.page_size)
                .with_idle_timeout(Some(self.config.call_timeout())),
        );
        let mapping = Self::mapping(&resource, &task.object_class, &facade)?;

        match task.mode {
            SyncMode::Incremental if !facade.supports(Capability::Sync) => {
                return Err(ProvisioningError::configuration(format!(
                    "connector {} does not support incremental sync",
                    facade.display_name()
                )));
            }
            SyncMode::Full
                if !facade.supports(Capability::Enumerate)
                    && !facade.supports(Capability::Search) =>
            {
                return Err(ProvisioningError::configuration(format!(
                    "connector {} can neither enumerate nor search",
                    facade.display_name()
                )));
            }
            _ => {}
        }

        let actions = task
            .actions
            .iter()
            .cloned()
            .zip(self.actions.sync_actions(&task.actions)?)
            .collect();
        let schemas = self.store.attribute_schemas().await?;
        let options = ConnectorFacade::operation_options(mapping.inbound_items());

        Ok(PullContext {
            resource,
            object_class: task.object_class.clone(),
            facade,
            mapping,
            actions,
            schemas,
            options,
        })
    }

    async fn pull(
        &self,
        task: &PullTask,
        summary: &mut RunSummary,
    ) -> ProvisioningResult<Option<SyncToken>> {
        self.ensure_running()?;
        let violations = self.validate_pull_task(task).await;
        if !violations.is_empty() {
            return Err(ProvisioningError::InvalidTask(violations));
        }

        let ctx = self.pull_context(task).await?;
        summary.transition(RunState::Fetching);

        match task.mode {
            SyncMode::Full => self.pull_full(&ctx, summary).await,
            SyncMode::Incremental => self.pull_incremental(&ctx, summary).await,
        }
    }

    async fn pull_full(
        &self,
        ctx: &PullContext,
        summary: &mut RunSummary,
    ) -> ProvisioningResult<Option<SyncToken>> {
        let object_class = &ctx.object_class;
        let facade: &ConnectorFacade = &ctx.facade;

        // Change feed position before enumeration, so a later incremental
        // run picks up whatever changes during it.
        let watermark = if facade.supports(Capability::Sync) {
            self.policy
                .execute("latest_sync_token", move || {
                    facade.latest_sync_token(object_class)
                })
                .await
                .map_err(stream_failure)?
        } else {
            None
        };

        let (result, seen, interrupted) = {
            let mut handler = PullHandler::new(self, ctx, summary);
            let result = with_deadline(
                "get_all_objects",
                self.config.stream_timeout(),
                facade.get_all_objects(object_class, &mut handler, &ctx.options),
            )
            .await;
            let PullHandler {
                seen, interrupted, ..
            } = handler;
            (result, seen, interrupted)
        };
        result.map_err(stream_failure)?;
        if interrupted {
            return Err(ProvisioningError::Interrupted);
        }

        self.detect_deletions(ctx, summary, &seen).await?;

        match watermark {
            Some(token) => {
                let stored = self
                    .store
                    .load_sync_token(&ctx.resource.key, object_class)
                    .await
                    .map_err(token_store_failure)?;
                self.commit_token(ctx, stored.as_ref(), token).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Handle linked identities the enumeration did not return.
    async fn detect_deletions(
        &self,
        ctx: &PullContext,
        summary: &mut RunSummary,
        seen: &HashSet<Uid>,
    ) -> ProvisioningResult<()> {
        let resource = &ctx.resource.key;
        let unseen: Vec<Uid> = self
            .store
            .list_linked(resource)
            .await?
            .into_iter()
            .filter(|identity| identity.any_type == ctx.mapping.any_type)
            .filter_map(|identity| identity.link(resource).map(|link| link.uid.clone()))
            .filter(|uid| !seen.contains(uid))
            .collect();

        if !unseen.is_empty() {
            info!(count = unseen.len(), policy = ?self.config.delete_unmatched, "Linked identities missing remotely");
        }

        for uid in unseen {
            self.ensure_running()?;
            summary.transition(RunState::Applying);
            let result = self.apply_pull_record(ctx, PullRecord::deleted(uid.clone())).await;
            tally(summary, &uid, result);
            summary.transition(RunState::Fetching);
        }
        Ok(())
    }

    async fn pull_incremental(
        &self,
        ctx: &PullContext,
        summary: &mut RunSummary,
    ) -> ProvisioningResult<Option<SyncToken>> {
        let object_class = &ctx.object_class;
        let facade: &ConnectorFacade = &ctx.facade;

        let stored = self
            .store
            .load_sync_token(&ctx.resource.key, object_class)
            .await
            .map_err(token_store_failure)?;

        let Some(stored) = stored else {
            let latest = self
                .policy
                .execute("latest_sync_token", move || {
                    facade.latest_sync_token(object_class)
                })
                .await
                .map_err(stream_failure)?;
            let Some(latest) = latest else {
                info!("Connector reported no sync token; nothing recorded");
                return Ok(None);
            };
            let token = self.commit_token(ctx, None, latest).await?;
            info!(%token, "Initial sync token recorded, no history consumed");
            return Ok(Some(token));
        };

        debug!(token = %stored.token, sequence = stored.sequence, "Resuming change feed");
        let (result, last_token, interrupted) = {
            let mut handler = PullHandler::new(self, ctx, summary);
            let result = with_deadline(
                "sync",
                self.config.stream_timeout(),
                facade.sync(object_class, Some(&stored.token), &mut handler, &ctx.options),
            )
            .await;
            let PullHandler {
                last_token,
                interrupted,
                ..
            } = handler;
            (result, last_token, interrupted)
        };
        let returned = result.map_err(stream_failure)?;
        if interrupted {
            return Err(ProvisioningError::Interrupted);
        }

        match returned.or(last_token) {
            Some(token) if token != stored.token => {
                self.commit_token(ctx, Some(&stored), token).await.map(Some)
            }
            _ => Ok(Some(stored.token)),
        }
    }

    /// Replace the stored token, checked against the record read earlier.
    async fn commit_token(
        &self,
        ctx: &PullContext,
        previous: Option<&SyncTokenRecord>,
        token: SyncToken,
    ) -> ProvisioningResult<SyncToken> {
        if previous.is_some_and(|record| record.token == token) {
            return Ok(token);
        }
        let record = self
            .store
            .save_sync_token(
                &ctx.resource.key,
                &ctx.object_class,
                token,
                previous.map(|record| record.sequence),
            )
            .await
            .map_err(token_store_failure)?;
        debug!(token = %record.token, sequence = record.sequence, "Sync token committed");
        Ok(record.token)
    }

    /// Apply one remote record to the store.
    async fn apply_pull_record(
        &self,
        ctx: &PullContext,
        mut record: PullRecord,
    ) -> Result<RecordAction, RecordError> {
        for (name, action) in &ctx.actions {
            match action
                .before_apply(&mut record)
                .await
                .map_err(|e| action_failure(name, e))?
            {
                ActionDecision::Proceed => {}
                ActionDecision::Skip => return Ok(RecordAction::Skipped),
            }
        }

        let resource = &ctx.resource.key;
        let linked = self
            .store
            .find_by_resource_link(resource, &record.uid)
            .await?;

        let applied = if record.delta_type == SyncDeltaType::Delete {
            self.remove_unmatched(resource, linked).await?
        } else {
            let object = record.object.as_ref().ok_or_else(|| {
                ConnectorError::internal(format!("change for {} carries no object", record.uid))
            })?;
            self.upsert(ctx, object, linked).await?
        };

        for (name, action) in &ctx.actions {
            action
                .after_apply(&record, applied)
                .await
                .map_err(|e| action_failure(name, e))?;
        }
        Ok(applied)
    }

    async fn remove_unmatched(
        &self,
        resource: &ResourceKey,
        linked: Option<Identity>,
    ) -> Result<RecordAction, RecordError> {
        let Some(mut identity) = linked else {
            return Ok(RecordAction::Skipped);
        };

        match self.config.delete_unmatched {
            DeleteUnmatched::Delete => {
                self.store.delete(identity.key).await?;
                debug!(identity = %identity.key, "Identity deleted");
                Ok(RecordAction::Deleted)
            }
            DeleteUnmatched::Unlink => {
                identity.unlink(resource);
                self.store.save(identity).await?;
                Ok(RecordAction::Unlinked)
            }
        }
    }

    async fn upsert(
        &self,
        ctx: &PullContext,
        object: &ConnectorObject,
        linked: Option<Identity>,
    ) -> Result<RecordAction, RecordError> {
        let values = self.resolver.inbound(object, &ctx.mapping)?;

        let (mut identity, action) = match linked {
            Some(identity) => (identity, RecordAction::Updated),
            None => match self.correlate(ctx, object).await? {
                Some(identity) => (identity, RecordAction::Updated),
                None => (
                    Identity::new(ctx.mapping.any_type.clone(), ""),
                    RecordAction::Created,
                ),
            },
        };

        MappingResolver::apply_inbound(&mut identity, &values, &ctx.schemas)?;
        let resource = &ctx.resource.key;
        if identity.link(resource).map(|link| &link.uid) != Some(&object.uid) {
            identity.set_link(resource, object.uid.clone());
        }

        let saved = self.store.save(identity).await?;
        debug!(identity = %saved.key, uid = %object.uid, ?action, "Remote object applied");
        Ok(action)
    }

    /// Find the single identity matching an unlinked remote object.
    async fn correlate(
        &self,
        ctx: &PullContext,
        object: &ConnectorObject,
    ) -> Result<Option<Identity>, RecordError> {
        let any_type = &ctx.mapping.any_type;
        for key in self.resolver.correlation_keys(object, &ctx.mapping)? {
            let (attribute, value, candidates) = match key {
                CorrelationKey::Name(name) => {
                    let found = self.store.find_by_name(any_type, &name).await?;
                    ("name".to_string(), name, found.into_iter().collect::<Vec<_>>())
                }
                CorrelationKey::Attribute { name, value } => {
                    let found = self.store.find_by_attribute(any_type, &name, &value).await?;
                    (name, value, found)
                }
            };

            match candidates.len() {
                0 => continue,
                1 => return Ok(candidates.into_iter().next()),
                count => {
                    return Err(RecordError::Correlation {
                        attribute,
                        value,
                        count,
                    })
                }
            }
        }
        Ok(None)
    }

    async fn push(
        &self,
        task: &PushTask,
        summary: &mut RunSummary,
    ) -> ProvisioningResult<Option<SyncToken>> {
        self.ensure_running()?;
        let violations = self.validate_push_task(task).await;
        if !violations.is_empty() {
            return Err(ProvisioningError::InvalidTask(violations));
        }

        let resource = self.load_resource(&task.resource).await?;
        let facade = self.connect(&resource).await?;
        let mapping = Self::mapping(&resource, &task.object_class, &facade)?;
        let actions = task
            .actions
            .iter()
            .cloned()
            .zip(self.actions.push_actions(&task.actions)?)
            .collect();
        let ctx = PushContext {
            target: PropagationTarget {
                resource,
                facade,
                mapping,
            },
            actions,
            schemas: self.store.attribute_schemas().await?,
        };
        summary.transition(RunState::Fetching);

        let identities = match &task.targets {
            PushTargets::All => {
                self.store
                    .list_by_any_type(&ctx.target.mapping.any_type)
                    .await?
            }
            PushTargets::Only(keys) => {
                let mut found = Vec::with_capacity(keys.len());
                for key in keys {
                    match self.store.find_identity(*key).await? {
                        Some(identity) => found.push(identity),
                        None => {
                            let error: RecordError = StoreError::not_found("identity", key).into();
                            summary.record_failure(key.to_string(), Some(*key), (&error).into());
                        }
                    }
                }
                found
            }
        };
        debug!(count = identities.len(), "Identities to push");

        for identity in identities {
            self.ensure_running()?;
            summary.transition(RunState::Applying);
            let key = identity.key;
            match self.push_identity(&ctx, identity).await {
                Ok(action) => summary.record(action),
                Err(detail) => {
                    warn!(identity = %key, error = %detail.message, "Push failed for identity");
                    summary.record_failure(key.to_string(), Some(key), detail);
                }
            }
            summary.transition(RunState::Fetching);
        }

        Ok(None)
    }

    async fn push_identity(
        &self,
        ctx: &PushContext,
        mut identity: Identity,
    ) -> Result<RecordAction, OutcomeDetail> {
        let detail = |error: RecordError| OutcomeDetail::from(&error);

        if identity.any_type != ctx.target.mapping.any_type {
            return Err(detail(
                MappingError::invalid(format!(
                    "identity type {} is not provisioned by this mapping",
                    identity.any_type
                ))
                .into(),
            ));
        }

        for (name, action) in &ctx.actions {
            match action.before_propagation(&mut identity).await {
                Ok(ActionDecision::Proceed) => {}
                Ok(ActionDecision::Skip) => return Ok(RecordAction::Skipped),
                Err(e) => return Err(detail(action_failure(name, e))),
            }
        }

        let violations = validate_identity(&identity, &ctx.schemas);
        if !violations.is_empty() {
            return Err(detail(StoreError::Violations(violations).into()));
        }

        let outcome = self
            .propagation
            .propagate_identity(&identity, &ctx.target, None)
            .await;

        for (name, action) in &ctx.actions {
            action
                .after_propagation(&identity, &outcome)
                .await
                .map_err(|e| detail(action_failure(name, e)))?;
        }

        match outcome.status {
            PropagationStatus::Success => Ok(match outcome.operation {
                Some(OperationType::Create) => RecordAction::Created,
                Some(OperationType::Delete) => RecordAction::Deleted,
                _ => RecordAction::Updated,
            }),
            PropagationStatus::NotAttempted => Ok(RecordAction::NotAttempted),
            PropagationStatus::Failure => Err(outcome.detail.unwrap_or(OutcomeDetail {
                kind: FailureKind::Connector(ErrorClass::Remote),
                message: "propagation failed".to_string(),
            })),
        }
    }
}

/// Feeds streamed records one at a time into the apply step.
struct PullHandler<'a> {
    engine: &'a ReconciliationEngine,
    ctx: &'a PullContext,
    summary: &'a mut RunSummary,
    seen: HashSet<Uid>,
    /// Token of the last delta handed to the apply step.
    last_token: Option<SyncToken>,
    interrupted: bool,
}

impl<'a> PullHandler<'a> {
    fn new(
        engine: &'a ReconciliationEngine,
        ctx: &'a PullContext,
        summary: &'a mut RunSummary,
    ) -> Self {
        Self {
            engine,
            ctx,
            summary,
            seen: HashSet::new(),
            last_token: None,
            interrupted: false,
        }
    }

    async fn process(&mut self, record: PullRecord) -> bool {
        if self.engine.is_shut_down() {
            self.interrupted = true;
            return false;
        }

        let uid = record.uid.clone();
        self.seen.insert(uid.clone());
        self.summary.transition(RunState::Applying);
        let result = self.engine.apply_pull_record(self.ctx, record).await;
        tally(self.summary, &uid, result);
        self.summary.transition(RunState::Fetching);
        true
    }
}

#[async_trait]
impl<'a> ResultsHandler for PullHandler<'a> {
    async fn handle(&mut self, object: ConnectorObject) -> bool {
        self.process(PullRecord::from_object(object)).await
    }
}

#[async_trait]
impl<'a> SyncResultsHandler for PullHandler<'a> {
    async fn handle(&mut self, delta: SyncDelta) -> bool {
        let token = delta.token.clone();
        let proceed = self.process(PullRecord::from_delta(delta)).await;
        if proceed {
            self.last_token = Some(token);
        }
        proceed
    }
}

fn tally(summary: &mut RunSummary, uid: &Uid, result: Result<RecordAction, RecordError>) {
    match result {
        Ok(action) => summary.record(action),
        Err(e) => {
            warn!(%uid, error = %e, "Failed to apply remote record");
            summary.record_failure(uid.to_string(), None, (&e).into());
        }
    }
}

fn action_failure(name: &str, error: ActionError) -> RecordError {
    RecordError::Action {
        name: name.to_string(),
        message: error.to_string(),
    }
}

fn stream_failure(source: ConnectorError) -> ProvisioningError {
    ProvisioningError::Stream { source }
}

fn token_store_failure(source: StoreError) -> ProvisioningError {
    ProvisioningError::TokenStore { source }
}
