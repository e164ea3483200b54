//! Sync and push actions.
//!
//! Actions are hooks invoked around each record's apply step. They are
//! registered under a name in an [`ActionRegistry`] and referenced by name
//! from task configuration; unknown names are rejected when a task is
//! validated, before a run starts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{PullRecord, RecordAction};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::identity::{Attribute, Identity};
use crate::propagation::PropagationOutcome;

/// Action failures; each fails only the record it was invoked for.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action refused the record.
    #[error("record rejected: {message}")]
    Rejected { message: String },

    #[error("action failed: {message}")]
    Failed { message: String },
}

pub type ActionResult<T> = Result<T, ActionError>;

/// Whether the record should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDecision {
    Proceed,
    Skip,
}

/// Hooks around each record of a pull run.
#[async_trait]
pub trait SyncActions: Send + Sync {
    /// May transform the remote record or veto it.
    async fn before_apply(&self, _record: &mut PullRecord) -> ActionResult<ActionDecision> {
        Ok(ActionDecision::Proceed)
    }

    async fn after_apply(&self, _record: &PullRecord, _action: RecordAction) -> ActionResult<()> {
        Ok(())
    }
}

/// Hooks around each identity of a push run.
#[async_trait]
pub trait PushActions: Send + Sync {
    /// May transform the identity copy being propagated or veto it.
    async fn before_propagation(&self, _identity: &mut Identity) -> ActionResult<ActionDecision> {
        Ok(ActionDecision::Proceed)
    }

    async fn after_propagation(
        &self,
        _identity: &Identity,
        _outcome: &PropagationOutcome,
    ) -> ActionResult<()> {
        Ok(())
    }
}

/// Named sync and push actions.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    sync: HashMap<String, Arc<dyn SyncActions>>,
    push: HashMap<String, Arc<dyn PushActions>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sync: Vec<&String> = self.sync.keys().collect();
        let mut push: Vec<&String> = self.push.keys().collect();
        sync.sort();
        push.sort();
        f.debug_struct("ActionRegistry")
            .field("sync", &sync)
            .field("push", &push)
            .finish()
    }
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sync(&mut self, name: impl Into<String>, actions: Arc<dyn SyncActions>) {
        self.sync.insert(name.into(), actions);
    }

    pub fn register_push(&mut self, name: impl Into<String>, actions: Arc<dyn PushActions>) {
        self.push.insert(name.into(), actions);
    }

    pub fn has_sync(&self, name: &str) -> bool {
        self.sync.contains_key(name)
    }

    pub fn has_push(&self, name: &str) -> bool {
        self.push.contains_key(name)
    }

    /// Resolve configured sync action names, in order.
    pub fn sync_actions(&self, names: &[String]) -> ProvisioningResult<Vec<Arc<dyn SyncActions>>> {
        names
            .iter()
            .map(|name| {
                self.sync
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ProvisioningError::UnknownAction { name: name.clone() })
            })
            .collect()
    }

    /// Resolve configured push action names, in order.
    pub fn push_actions(&self, names: &[String]) -> ProvisioningResult<Vec<Arc<dyn PushActions>>> {
        names
            .iter()
            .map(|name| {
                self.push
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ProvisioningError::UnknownAction { name: name.clone() })
            })
            .collect()
    }
}

/// Line-based attribute rules usable as both sync and push actions.
///
/// Supports:
/// - `set:attributeName=value` - Set an attribute
/// - `remove:attributeName` - Remove an attribute
/// - `validate:attributeName!=null` - Reject records without the attribute
/// - `skip:attributeName=value` - Skip records carrying that value
/// - `log:message` - Log a message
///
/// Pull records are edited by remote attribute name, identities by
/// internal attribute name.
#[derive(Debug, Clone)]
pub struct ExpressionActions {
    expression: String,
}

enum Rule<'a> {
    Set(&'a str, &'a str),
    Remove(&'a str),
    Require(&'a str),
    SkipIf(&'a str, &'a str),
    Log(&'a str),
}

impl ExpressionActions {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    fn rules(&self) -> ActionResult<Vec<Rule<'_>>> {
        let mut rules = Vec::new();
        for line in self.expression.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let rule = if let Some(expr) = line.strip_prefix("set:") {
                expr.split_once('=')
                    .map(|(attr, value)| Rule::Set(attr.trim(), value.trim()))
            } else if let Some(attr) = line.strip_prefix("remove:") {
                Some(Rule::Remove(attr.trim()))
            } else if let Some(expr) = line.strip_prefix("validate:") {
                expr.strip_suffix("!=null").map(|attr| Rule::Require(attr.trim()))
            } else if let Some(expr) = line.strip_prefix("skip:") {
                expr.split_once('=')
                    .map(|(attr, value)| Rule::SkipIf(attr.trim(), value.trim()))
            } else if let Some(message) = line.strip_prefix("log:") {
                Some(Rule::Log(message.trim()))
            } else {
                None
            };

            rules.push(rule.ok_or_else(|| ActionError::Failed {
                message: format!("unsupported rule '{line}'"),
            })?);
        }
        Ok(rules)
    }
}

#[async_trait]
impl SyncActions for ExpressionActions {
    async fn before_apply(&self, record: &mut PullRecord) -> ActionResult<ActionDecision> {
        let Some(object) = record.object.as_mut() else {
            return Ok(ActionDecision::Proceed);
        };

        for rule in self.rules()? {
            match rule {
                Rule::Set(attr, value) => object.attributes.set(attr, value),
                Rule::Remove(attr) => {
                    object.attributes.remove(attr);
                }
                Rule::Require(attr) => {
                    if object.texts(attr).is_empty() {
                        return Err(ActionError::Rejected {
                            message: format!("{attr} is null or missing"),
                        });
                    }
                }
                Rule::SkipIf(attr, value) => {
                    if object.texts(attr).iter().any(|v| v == value) {
                        debug!(uid = %record.uid, attr, "Record skipped by action");
                        return Ok(ActionDecision::Skip);
                    }
                }
                Rule::Log(message) => info!(uid = %record.uid, action_message = %message, "Sync action log"),
            }
        }
        Ok(ActionDecision::Proceed)
    }
}

#[async_trait]
impl PushActions for ExpressionActions {
    async fn before_propagation(&self, identity: &mut Identity) -> ActionResult<ActionDecision> {
        for rule in self.rules()? {
            match rule {
                Rule::Set(attr, value) => identity.set_attribute(Attribute::single(attr, value)),
                Rule::Remove(attr) => {
                    identity.remove_attribute(attr);
                }
                Rule::Require(attr) => {
                    if identity.values(attr).is_empty() {
                        return Err(ActionError::Rejected {
                            message: format!("{attr} is null or missing"),
                        });
                    }
                }
                Rule::SkipIf(attr, value) => {
                    if identity.values(attr).iter().any(|v| v == value) {
                        debug!(identity = %identity.key, attr, "Identity skipped by action");
                        return Ok(ActionDecision::Skip);
                    }
                }
                Rule::Log(message) => {
                    info!(identity = %identity.key, action_message = %message, "Push action log");
                }
            }
        }
        Ok(ActionDecision::Proceed)
    }
}
