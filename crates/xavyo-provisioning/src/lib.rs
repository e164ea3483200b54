//! # Provisioning Engine
//!
//! Keeps xavyo identities and the accounts on connected systems in sync.
//!
//! This crate provides:
//! - The identity model with explicit validation
//! - Attribute mapping resolution in both directions
//! - Propagation of identities to resources (create, update, delete)
//! - Pull and push reconciliation, full or incremental
//! - Sync token persistence for resumable change feeds
//! - Sync/push action hooks registered by name
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────┐     ┌───────────────────┐
//! │   Scheduler     │────►│ ReconciliationEngine │────►│  Sync token store │
//! │ (run_all/       │     │  (pull / push)       │     │                   │
//! │  periodic)      │     └──────────┬───────────┘     └───────────────────┘
//! └─────────────────┘                │
//!                        ┌───────────┼─────────────────────────┐
//!                        │ pull      │ push                    │
//!                        ▼           ▼                         │
//!                 ┌────────────┐  ┌───────────────────┐        │
//!                 │   Store    │◄─│ PropagationEngine │        │
//!                 │ (identity, │  └─────────┬─────────┘        │
//!                 │  links)    │            │                  │
//!                 └────────────┘            ▼                  ▼
//!                               ┌─────────────────┐   ┌─────────────────┐
//!                               │ MappingResolver │   │ ConnectorFacade │
//!                               └─────────────────┘   └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_provisioning::{EngineConfig, MemoryStore, PropagationRequest, ReconciliationEngine};
//!
//! let engine = ReconciliationEngine::new(store, connectors, EngineConfig::from_env()?);
//!
//! // Push one identity
//! let outcome = engine
//!     .propagation()
//!     .propagate(&PropagationRequest::new(identity.key, ResourceKey::new("ldap")))
//!     .await;
//!
//! // Pull changes since the last run
//! let summary = engine
//!     .run_pull(&PullTask::new("ldap", ObjectClass::account(), SyncMode::Incremental))
//!     .await;
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod password;
pub mod propagation;
pub mod reconciliation;
pub mod resolver;
pub mod resource;
pub mod store;
pub mod token;
pub mod validation;

// Re-exports for convenience
pub use config::{DeleteUnmatched, EngineConfig};
pub use error::{
    FailureKind, MappingError, ProvisioningError, ProvisioningResult, RecordError, StoreError,
    StoreResult,
};
pub use identity::{
    AnyType, AnyTypeKind, Attribute, AttributeSchema, Identity, IdentityKey, IdentityStatus,
    ResourceKey, ResourceLink,
};
pub use password::{EncryptedPassword, PasswordCipher, PasswordPropagation};
pub use propagation::{
    BulkPropagationResult, OutcomeDetail, PropagationEngine, PropagationOutcome,
    PropagationRequest, PropagationStatus, PropagationTarget,
};
pub use resolver::{CorrelationKey, InboundValues, MappingResolver, ResolvedAttributes};
pub use resource::Resource;
pub use store::{MemoryStore, Store, VirtualAttribute};
pub use token::SyncTokenRecord;
pub use validation::{validate_any_type, validate_identity, Violation, ViolationKind};

// Reconciliation exports
pub use reconciliation::{
    actions::{
        ActionDecision, ActionError, ActionRegistry, ActionResult, ExpressionActions, PushActions,
        SyncActions,
    },
    engine::{PullTask, PushTargets, PushTask, ReconciliationEngine},
    scheduler::{Scheduler, SyncTask},
    summary::{RecordFailure, RunCounts, RunFailure, RunSummary},
    types::{Direction, PullRecord, RecordAction, RunState, SyncMode},
};
