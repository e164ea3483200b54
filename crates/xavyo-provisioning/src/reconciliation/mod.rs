//! # Reconciliation Engine
//!
//! Diff-and-apply runs between the identity store and a resource.
//!
//! ## Overview
//!
//! - **Pull** reads remote state and updates the store: full enumeration with
//!   deletion detection for linked identities the resource no longer returns,
//!   or incremental consumption of the change feed from the stored sync token
//! - **Push** reads identities and propagates them through the
//!   [`PropagationEngine`](crate::propagation::PropagationEngine)
//! - Named sync and push actions run around every record
//! - Every run yields a [`RunSummary`]; per-record failures never abort a run
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      ReconciliationEngine                           │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  INIT ──► FETCHING ──► APPLYING ──► COMMITTED                       │
//! │   │          ▲            │   │                                     │
//! │   │          └────────────┘   └──► FAILED (run-level errors only)   │
//! │   │                                                                 │
//! │   ▼                                                                 │
//! │  ┌───────────────┐    ┌───────────────┐    ┌───────────────┐        │
//! │  │   Connector   │───►│ SyncActions / │───►│ Store or      │        │
//! │  │   stream      │    │ PushActions   │    │ Propagation   │        │
//! │  └───────────────┘    └───────────────┘    └───────────────┘        │
//! │          │                                         │                │
//! │          ▼                                         ▼                │
//! │  ┌───────────────┐                         ┌───────────────┐        │
//! │  │  Sync token   │◄── commit on exhaustion │  RunSummary   │        │
//! │  └───────────────┘                         └───────────────┘        │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use xavyo_provisioning::reconciliation::{PullTask, Scheduler, SyncMode};
//!
//! let scheduler = Scheduler::new(Arc::new(engine));
//! let summary = scheduler
//!     .run_pull(&PullTask::new("ldap", ObjectClass::account(), SyncMode::Incremental))
//!     .await;
//! assert!(summary.is_committed());
//! ```

pub mod actions;
pub mod engine;
pub mod scheduler;
pub mod summary;
pub mod types;

// Re-export main types
pub use actions::{
    ActionDecision, ActionError, ActionRegistry, ActionResult, ExpressionActions, PushActions,
    SyncActions,
};
pub use engine::{PullTask, PushTargets, PushTask, ReconciliationEngine};
pub use scheduler::{Scheduler, SyncTask};
pub use summary::{RecordFailure, RunCounts, RunFailure, RunSummary};
pub use types::{Direction, PullRecord, RecordAction, RunState, SyncMode};
