//! Connector instance registry.
//!
//! Holds one loaded [`ConnectorFacade`] per configured connector so that
//! capability discovery runs once per configuration load.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::ConnectorResult;
use crate::facade::ConnectorFacade;
use crate::traits::Connector;
use crate::types::ConnectorId;

/// Registry of loaded connector façades keyed by connector id.
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    facades: RwLock<HashMap<ConnectorId, Arc<ConnectorFacade>>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a connector and register its façade, replacing any previous one.
    pub async fn register(
        &self,
        id: ConnectorId,
        connector: Arc<dyn Connector>,
    ) -> ConnectorResult<Arc<ConnectorFacade>> {
        let facade = Arc::new(ConnectorFacade::load(connector).await?);
        info!(connector_id = %id, name = facade.display_name(), capabilities = %facade.capabilities(), "Connector registered");
        self.facades.write().await.insert(id, facade.clone());
        Ok(facade)
    }

    /// Register an already loaded façade.
    pub async fn insert(&self, id: ConnectorId, facade: Arc<ConnectorFacade>) {
        self.facades.write().await.insert(id, facade);
    }

    pub async fn get(&self, id: &ConnectorId) -> Option<Arc<ConnectorFacade>> {
        self.facades.read().await.get(id).cloned()
    }

    /// Drop the façade; the next `register` re-runs capability discovery.
    pub async fn remove(&self, id: &ConnectorId) -> Option<Arc<ConnectorFacade>> {
        self.facades.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.facades.read().await.len()
    }
}
