//! Connector Framework traits
//!
//! Capability-based trait definitions for connectors, inspired by `ConnId`.
//!
//! Every connector implements [`Connector`]. Each optional operation is a
//! separate trait; a connector advertises the ones it implements through the
//! `as_*` accessors, which the façade reads once to build its
//! [`CapabilitySet`].

use async_trait::async_trait;

use crate::capability::{Capability, CapabilitySet};
use crate::error::ConnectorResult;
use crate::operation::{
    AttributeSet, ConnectorObject, Filter, OperationOptions, PageRequest, SearchResult, SyncDelta,
    SyncToken, Uid,
};
use crate::schema::{Schema, UID};
use crate::types::ObjectClass;

/// Receives objects one at a time from an enumeration or search.
///
/// Returning `false` stops the enumeration early.
#[async_trait]
pub trait ResultsHandler: Send {
    async fn handle(&mut self, object: ConnectorObject) -> bool;
}

/// Receives change-feed deltas one at a time.
///
/// Returning `false` stops the feed; the connector must not report a new
/// token past the last delta handled.
#[async_trait]
pub trait SyncResultsHandler: Send {
    async fn handle(&mut self, delta: SyncDelta) -> bool;
}

/// Base trait for all connectors.
///
/// This trait provides common functionality that all connectors must implement,
/// regardless of their specific capabilities.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Test the connection to the target system.
    async fn test(&self) -> ConnectorResult<()>;

    /// Validate the connector configuration without contacting the target.
    async fn validate(&self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Object classes this connector instance handles.
    fn supported_object_classes(&self) -> Vec<ObjectClass>;

    fn as_authenticate(&self) -> Option<&dyn AuthenticateOp> {
        None
    }

    fn as_create(&self) -> Option<&dyn CreateOp> {
        None
    }

    fn as_update(&self) -> Option<&dyn UpdateOp> {
        None
    }

    fn as_delete(&self) -> Option<&dyn DeleteOp> {
        None
    }

    fn as_search(&self) -> Option<&dyn SearchOp> {
        None
    }

    fn as_enumerate(&self) -> Option<&dyn EnumerateOp> {
        None
    }

    fn as_sync(&self) -> Option<&dyn SyncOp> {
        None
    }

    fn as_schema(&self) -> Option<&dyn SchemaOp> {
        None
    }

    /// Capabilities derived from the implemented operation traits.
    fn capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();
        let accessors = [
            (self.as_authenticate().is_some(), Capability::Authenticate),
            (self.as_create().is_some(), Capability::Create),
            (self.as_update().is_some(), Capability::Update),
            (self.as_delete().is_some(), Capability::Delete),
            (self.as_search().is_some(), Capability::Search),
            (self.as_enumerate().is_some(), Capability::Enumerate),
            (self.as_sync().is_some(), Capability::Sync),
            (self.as_schema().is_some(), Capability::Schema),
        ];
        for (present, capability) in accessors {
            if present {
                caps.insert(capability);
            }
        }
        caps
    }
}

/// Capability for authenticating an account against the target system.
#[async_trait]
pub trait AuthenticateOp: Connector {
    /// Returns the remote id of the authenticated account, or
    /// `ConnectorError::InvalidCredentials`.
    async fn authenticate(
        &self,
        object_class: &ObjectClass,
        username: &str,
        password: &str,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for creating objects in the target system.
#[async_trait]
pub trait CreateOp: Connector {
    /// Create a new object in the target system.
    ///
    /// # Returns
    /// The unique identifier (UID) of the created object in the target system.
    async fn create(
        &self,
        object_class: &ObjectClass,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for updating objects in the target system.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Replace the given attributes on an existing object.
    ///
    /// # Returns
    /// The UID of the updated object (may change for some systems).
    async fn update(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for deleting objects from the target system.
#[async_trait]
pub trait DeleteOp: Connector {
    /// Fails with `ConnectorError::ObjectNotFound` if the object is absent.
    async fn delete(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;
}

/// Capability for searching objects in the target system.
#[async_trait]
pub trait SearchOp: Connector {
    /// Fetch one page of objects matching the filter.
    async fn search(
        &self,
        object_class: &ObjectClass,
        filter: Option<&Filter>,
        page: &PageRequest,
        options: &OperationOptions,
    ) -> ConnectorResult<SearchResult>;

    /// Get a single object by its UID.
    ///
    /// This is a convenience method that searches for a specific object.
    async fn get_object(
        &self,
        object_class: &ObjectClass,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        let filter = Filter::eq(UID, uid.value());
        let result = self
            .search(object_class, Some(&filter), &PageRequest::new(1), options)
            .await?;

        Ok(result.objects.into_iter().next())
    }
}

/// Capability for native full enumeration of an object class.
#[async_trait]
pub trait EnumerateOp: Connector {
    async fn get_all_objects(
        &self,
        object_class: &ObjectClass,
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;
}

/// Capability for incremental synchronization from the target system.
///
/// The sync token is an opaque string that represents the synchronization state.
/// Different systems use different token formats:
/// - LDAP: sync cookie (binary, base64 encoded)
/// - AD: `DirSync` cookie
/// - Database: Last processed sequence number or timestamp
/// - REST: Page cursor or version number
#[async_trait]
pub trait SyncOp: Connector {
    /// Deliver every change after `token` to the handler.
    ///
    /// # Returns
    /// The token to resume from once the remote side signals end of batch,
    /// or `None` when nothing was consumed.
    async fn sync(
        &self,
        object_class: &ObjectClass,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>>;

    /// Current head of the change feed, without consuming any change.
    async fn latest_sync_token(&self, object_class: &ObjectClass)
        -> ConnectorResult<Option<SyncToken>>;
}

/// Capability for discovering the schema of a target system.
#[async_trait]
pub trait SchemaOp: Connector {
    async fn schema(&self) -> ConnectorResult<Schema>;
}
