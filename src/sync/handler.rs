//! Replication consumer: merges incoming sync data against the
//! authoritative record and commits through the save pipeline.

use std::sync::Arc;

use serde_json::Value;

use crate::catalog::{EntityCatalog, EntityDef};
use crate::error::Error;
use crate::pipeline::{SaveOutcome, SavePipeline};

pub struct SyncActionHandler {
    catalog: Arc<EntityCatalog>,
    pipeline: Arc<dyn SavePipeline>,
}

impl SyncActionHandler {
    pub fn new(catalog: Arc<EntityCatalog>, pipeline: Arc<dyn SavePipeline>) -> Self {
        Self { catalog, pipeline }
    }

    /// Apply a replicated save and return the resulting document id.
    ///
    /// With a document id and a non-empty property list this is a partial
    /// merge: only the named fields are copied onto the authoritative
    /// record, everything else keeps its current value. Otherwise the
    /// incoming data is used verbatim (insert or full replace).
    pub async fn handle_save(
        &self,
        collection: &str,
        document_id: Option<&str>,
        data: &Value,
        properties: Option<&[String]>,
    ) -> Result<String, Error> {
        let def = self
            .catalog
            .resolve(collection)
            .ok_or_else(|| Error::unknown_collection(collection))?;

        let document = match (document_id, properties) {
            (Some(id), Some(props)) if !props.is_empty() => {
                let existing = self
                    .pipeline
                    .load(collection, id)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("document {id} in {collection}")))?;

                merge_properties(def, existing, data, props)
            }
            _ => project(def, data),
        };

        let outcome = self
            .pipeline
            .save(collection, document_id, document)
            .await?;

        match outcome {
            SaveOutcome::Saved { id } => {
                tracing::debug!(collection, id = %id, "replicated save committed");
                Ok(id)
            }
            SaveOutcome::NeedsConfirmation { step, .. } => Err(Error::save_rejected(format!(
                "save requires confirmation at step {step}"
            ))),
            SaveOutcome::Failed { reason } => Err(Error::save_rejected(reason)),
        }
    }

    pub async fn handle_delete(&self, collection: &str, document_id: &str) -> Result<(), Error> {
        self.catalog
            .resolve(collection)
            .ok_or_else(|| Error::unknown_collection(collection))?;

        self.pipeline.delete(collection, document_id).await?;

        tracing::debug!(collection, id = document_id, "replicated delete committed");

        Ok(())
    }
}

/// Copy only the named properties from the incoming data onto the existing
/// record. A named property absent from the data clears the field, matching
/// a changed-to-empty write. Properties the entity does not declare are
/// ignored.
fn merge_properties(def: &EntityDef, mut existing: Value, incoming: &Value, properties: &[String]) -> Value {
    if let (Some(target), Some(source)) = (existing.as_object_mut(), incoming.as_object()) {
        for prop in properties {
            if !def.has_property(prop) {
                continue;
            }
            target.insert(
                prop.clone(),
                source.get(prop).cloned().unwrap_or(Value::Null),
            );
        }
    }

    existing
}

/// Restrict an incoming document to the entity's declared properties, the
/// way deserializing into the target type drops unknown fields.
fn project(def: &EntityDef, data: &Value) -> Value {
    match data.as_object() {
        Some(source) => Value::Object(
            source
                .iter()
                .filter(|(k, _)| def.has_property(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => data.clone(),
    }
}
