//! Persisted sync token for resumable incremental reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use xavyo_connector::operation::SyncToken;
use xavyo_connector::types::ObjectClass;

use crate::identity::ResourceKey;

/// Last consumed change-feed position for one resource and object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTokenRecord {
    pub resource: ResourceKey,
    pub object_class: ObjectClass,
    /// Opaque cursor from the connector.
    pub token: SyncToken,
    /// Sequence number for optimistic locking; starts at 1.
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl SyncTokenRecord {
    #[must_use]
    pub fn new(resource: ResourceKey, object_class: ObjectClass, token: SyncToken) -> Self {
        Self {
            resource,
            object_class,
            token,
            sequence: 1,
            updated_at: Utc::now(),
        }
    }

    /// Replace the cursor, bumping the sequence.
    #[must_use]
    pub fn advance(&self, token: SyncToken) -> Self {
        Self {
            resource: self.resource.clone(),
            object_class: self.object_class.clone(),
            token,
            sequence: self.sequence + 1,
            updated_at: Utc::now(),
        }
    }
}
