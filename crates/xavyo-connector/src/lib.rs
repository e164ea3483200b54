//! # Connector Framework
//!
//! Core abstractions for connecting xavyo to external identity systems.
//!
//! This crate defines the contract between the provisioning engine and the
//! connectors that reach directories, databases and SaaS APIs.
//!
//! ## Architecture
//!
//! The framework uses a capability-based trait system inspired by `ConnId`:
//!
//! - [`Connector`](traits::Connector) - Base trait all connectors implement
//! - [`CreateOp`](traits::CreateOp), [`UpdateOp`](traits::UpdateOp),
//!   [`DeleteOp`](traits::DeleteOp) - write operations
//! - [`SearchOp`](traits::SearchOp), [`EnumerateOp`](traits::EnumerateOp) - reads
//! - [`SyncOp`](traits::SyncOp) - token-based change feed
//! - [`ConnectorFacade`](facade::ConnectorFacade) - capability-checked entry
//!   point used by the engine
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_connector::prelude::*;
//!
//! let facade = ConnectorFacade::load(Arc::new(ldap_connector)).await?;
//! facade.test().await?;
//!
//! let attrs = AttributeSet::new()
//!     .with("__NAME__", "jdoe")
//!     .with("mail", "jdoe@example.com");
//! let uid = facade
//!     .create(&ObjectClass::account(), attrs, &OperationOptions::default())
//!     .await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`types`] - Identifiers, object classes, operation kinds
//! - [`error`] - Error types with transient/permanent classification
//! - [`capability`] - Capability flags and sets
//! - [`traits`] - Connector capability traits and result handlers
//! - [`facade`] - The connector façade
//! - [`schema`] - Schema types and special attribute names
//! - [`operation`] - Operation types (Uid, `AttributeSet`, Filter, deltas)
//! - [`mapping`] - Attribute mapping configuration
//! - [`resilience`] - Call deadline and retry policy
//! - [`registry`] - Loaded connector instances

pub mod capability;
pub mod error;
pub mod facade;
pub mod mapping;
pub mod operation;
pub mod registry;
pub mod resilience;
pub mod schema;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use xavyo_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::types::{ConnectorId, ObjectClass, OperationType};

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult, ErrorClass};

    pub use crate::capability::{Capability, CapabilitySet};

    // Traits
    pub use crate::traits::{
        AuthenticateOp, Connector, CreateOp, DeleteOp, EnumerateOp, ResultsHandler, SchemaOp,
        SearchOp, SyncOp, SyncResultsHandler, UpdateOp,
    };

    pub use crate::facade::{CollectingHandler, ConnectorFacade};

    // Schema
    pub use crate::schema::{AttributeInfo, ObjectClassInfo, Schema};

    // Operations
    pub use crate::operation::{
        AttributeSet, AttributeValue, ConnectorObject, Filter, OperationOptions, PageRequest,
        SearchResult, SortKey, SyncDelta, SyncDeltaType, SyncToken, Uid,
    };

    pub use crate::registry::ConnectorRegistry;

    // Resilience
    pub use crate::resilience::{CallPolicy, RetryConfig, StreamWatch};

    // Mapping
    pub use crate::mapping::{
        ItemPurpose, ItemSource, Mapping, MappingDirection, MappingItem, Transform,
    };
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
