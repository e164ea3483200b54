//! Types shared by reconciliation runs.

use serde::{Deserialize, Serialize};

use xavyo_connector::operation::{ConnectorObject, SyncDelta, SyncDeltaType, Uid};

/// Which side is the source of truth for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Remote to internal.
    Pull,
    /// Internal to remote.
    Push,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Pull => write!(f, "pull"),
            Direction::Push => write!(f, "push"),
        }
    }
}

/// Full enumeration or token-based change feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Init,
    Fetching,
    Applying,
    Committed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Committed | RunState::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Init, RunState::Fetching)
            | (RunState::Fetching, RunState::Applying)
            | (RunState::Applying, RunState::Fetching)
            | (RunState::Applying, RunState::Committed) => true,
            (state, RunState::Failed) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Init => "INIT",
            RunState::Fetching => "FETCHING",
            RunState::Applying => "APPLYING",
            RunState::Committed => "COMMITTED",
            RunState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What applying one record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Created,
    Updated,
    Deleted,
    /// The link to the resource was dropped, the identity kept.
    Unlinked,
    /// Vetoed by an action or nothing to do.
    Skipped,
    /// The connector lacks the needed capability.
    NotAttempted,
}

/// One remote record as seen by a pull run.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRecord {
    pub delta_type: SyncDeltaType,
    pub uid: Uid,
    /// Absent for deletions.
    pub object: Option<ConnectorObject>,
}

impl PullRecord {
    /// A record from full enumeration.
    pub fn from_object(object: ConnectorObject) -> Self {
        Self {
            delta_type: SyncDeltaType::Update,
            uid: object.uid.clone(),
            object: Some(object),
        }
    }

    pub fn from_delta(delta: SyncDelta) -> Self {
        Self {
            delta_type: delta.delta_type,
            uid: delta.uid,
            object: delta.object,
        }
    }

    /// A deletion detected by a full run.
    pub fn deleted(uid: Uid) -> Self {
        Self {
            delta_type: SyncDeltaType::Delete,
            uid,
            object: None,
        }
    }
}
