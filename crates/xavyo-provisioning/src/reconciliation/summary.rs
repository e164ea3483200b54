//! Run summaries.
//!
//! A [`RunSummary`] is returned for every run, committed or failed. It counts
//! outcomes, lists per-record failures and reports a run-level failure
//! separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use xavyo_connector::operation::SyncToken;
use xavyo_connector::types::ObjectClass;

use super::types::{Direction, RecordAction, RunState, SyncMode};
use crate::error::{FailureKind, ProvisioningError};
use crate::identity::{IdentityKey, ResourceKey};
use crate::propagation::OutcomeDetail;

/// Counts by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Records handed to the apply step.
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub unlinked: u32,
    pub skipped: u32,
    pub failed: u32,
    pub not_attempted: u32,
}

/// A record that failed to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Remote id or identity key of the record.
    pub record: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityKey>,
    pub kind: FailureKind,
    pub message: String,
}

/// Failure that aborted the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub code: String,
    pub message: String,
}

impl From<&ProvisioningError> for RunFailure {
    fn from(error: &ProvisioningError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub resource: ResourceKey,
    pub object_class: ObjectClass,
    pub direction: Direction,
    pub mode: SyncMode,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_failure: Option<RunFailure>,
    /// Token persisted at commit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_token: Option<SyncToken>,
}

impl RunSummary {
    pub fn new(
        resource: &ResourceKey,
        object_class: &ObjectClass,
        direction: Direction,
        mode: SyncMode,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            resource: resource.clone(),
            object_class: object_class.clone(),
            direction,
            mode,
            state: RunState::Init,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            failures: Vec::new(),
            run_failure: None,
            committed_token: None,
        }
    }

    /// Move to `next`; invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            warn!(run_id = %self.run_id, from = %self.state, to = %next, "Invalid run state transition");
        }
    }

    pub fn record(&mut self, action: RecordAction) {
        self.counts.processed += 1;
        match action {
            RecordAction::Created => self.counts.created += 1,
            RecordAction::Updated => self.counts.updated += 1,
            RecordAction::Deleted => self.counts.deleted += 1,
            RecordAction::Unlinked => self.counts.unlinked += 1,
            RecordAction::Skipped => self.counts.skipped += 1,
            RecordAction::NotAttempted => self.counts.not_attempted += 1,
        }
    }

    pub fn record_failure(
        &mut self,
        record: impl Into<String>,
        identity: Option<IdentityKey>,
        detail: OutcomeDetail,
    ) {
        self.counts.processed += 1;
        self.counts.failed += 1;
        self.failures.push(RecordFailure {
            record: record.into(),
            identity,
            kind: detail.kind,
            message: detail.message,
        });
    }

    /// Terminate as committed.
    pub fn commit(&mut self, token: Option<SyncToken>) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(RunState::Applying);
        self.transition(RunState::Committed);
        self.committed_token = token;
        self.finished_at = Some(Utc::now());
    }

    /// Terminate as failed.
    pub fn fail(&mut self, error: &ProvisioningError) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(RunState::Failed);
        self.run_failure = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_committed(&self) -> bool {
        self.state == RunState::Committed
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }
}
