//! Replication producer: turns local writes against non-owned entities into
//! queued sync actions addressed to the owning module.

use std::collections::HashMap;

use serde_json::Value;

use crate::bus::MessageBus;
use crate::sync::types::{
    SyncAction, SyncActionDeploymentMessage, SyncActionRequest, SyncActionType,
};

/// Replication metadata declared for an entity type whose authoritative
/// copy lives elsewhere.
#[derive(Debug, Clone)]
pub struct ReplicaMetadata {
    pub owner_module: String,
    /// Source collection name on the owning module.
    pub collection: String,
    /// Property names of the replicated (ETL-projected) type. Used as the
    /// changed set when the caller tracks no flags, so a narrower replica
    /// never overwrites owner-only fields it cannot see.
    pub properties: Vec<String>,
}

pub struct SyncInterceptor {
    bus: MessageBus,
    module_name: String,
    replicas: HashMap<String, ReplicaMetadata>,
}

impl SyncInterceptor {
    pub fn new(
        bus: MessageBus,
        module_name: impl Into<String>,
        replicas: impl IntoIterator<Item = (String, ReplicaMetadata)>,
    ) -> Self {
        Self {
            bus,
            module_name: module_name.into(),
            replicas: replicas.into_iter().collect(),
        }
    }

    pub fn is_replicated(&self, entity: &str) -> bool {
        self.replicas.contains_key(entity)
    }

    /// Intercept a save. No document id means an insert, otherwise an
    /// update. An unknown entity is a programming error and raises
    /// immediately; the publish inherits bus failure semantics.
    pub async fn handle_save(
        &self,
        entity: &str,
        document_id: Option<&str>,
        data: Value,
        changed: Option<Vec<String>>,
    ) -> eyre::Result<()> {
        let meta = self.metadata(entity)?;

        let action_type = match document_id {
            Some(_) => SyncActionType::Update,
            None => SyncActionType::Insert,
        };

        // Explicit change flags win; otherwise fall back to the replicated
        // type's full property set.
        let properties = match changed {
            Some(props) if !props.is_empty() => props,
            _ => meta.properties.clone(),
        };

        let action = SyncAction {
            action_type,
            collection: meta.collection.clone(),
            document_id: document_id.map(str::to_owned),
            data: Some(data),
            properties: Some(properties),
        };

        self.dispatch(meta, action).await
    }

    pub async fn handle_delete(&self, entity: &str, document_id: &str) -> eyre::Result<()> {
        let meta = self.metadata(entity)?;

        let action = SyncAction {
            action_type: SyncActionType::Delete,
            collection: meta.collection.clone(),
            document_id: Some(document_id.to_owned()),
            data: None,
            properties: None,
        };

        self.dispatch(meta, action).await
    }

    async fn dispatch(&self, meta: &ReplicaMetadata, action: SyncAction) -> eyre::Result<()> {
        // One lane per replicated collection keeps replicated writes ordered
        // even across entity instances.
        let queue = format!("sync-{}", meta.collection);

        tracing::debug!(
            collection = %meta.collection,
            owner = %meta.owner_module,
            action = %action.action_type,
            "dispatching sync action"
        );

        let message = SyncActionDeploymentMessage {
            owner_module: meta.owner_module.clone(),
            request: SyncActionRequest {
                requesting_module: self.module_name.clone(),
                actions: vec![action],
            },
        };

        self.bus.broadcast(&message, Some(&queue)).await?;

        Ok(())
    }

    fn metadata(&self, entity: &str) -> eyre::Result<&ReplicaMetadata> {
        self.replicas
            .get(entity)
            .ok_or_else(|| eyre::eyre!("entity {entity} is not replicated"))
    }
}
