use std::collections::BTreeMap;

use formkeep_core::{Attributes, EntityType, FieldPath, FieldSchemaNode, Methods};

use crate::backend::Backend;
use crate::error::EngineError;

/// Schema and permissions for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub attributes: Attributes,
    pub methods: Methods,
}

/// Per-entity-type cache of attributes and methods, filled from the backend
/// only when absent.
#[derive(Debug, Default)]
pub struct SchemaStore {
    entries: BTreeMap<EntityType, EntitySchema>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch attributes and methods for `entity_type` unless already cached.
    pub fn ensure_loaded<B: Backend + ?Sized>(
        &mut self,
        entity_type: &EntityType,
        backend: &mut B,
    ) -> Result<&EntitySchema, EngineError> {
        if !self.entries.contains_key(entity_type) {
            let attributes = backend.schema(entity_type)?;
            let methods = backend.permissions(entity_type)?;
            tracing::debug!(
                entity_type = %entity_type,
                fields = attributes.len(),
                "schema cache filled"
            );
            self.entries
                .insert(entity_type.clone(), EntitySchema { attributes, methods });
        }
        self.get(entity_type)
    }

    pub fn insert(&mut self, entity_type: EntityType, attributes: Attributes, methods: Methods) {
        self.entries
            .insert(entity_type, EntitySchema { attributes, methods });
    }

    pub fn invalidate(&mut self, entity_type: &EntityType) -> bool {
        self.entries.remove(entity_type).is_some()
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.entries.contains_key(entity_type)
    }

    pub fn get(&self, entity_type: &EntityType) -> Result<&EntitySchema, EngineError> {
        self.entries
            .get(entity_type)
            .ok_or_else(|| EngineError::SchemaUnavailable(entity_type.to_string()))
    }

    pub fn attributes(&self, entity_type: &EntityType) -> Result<&Attributes, EngineError> {
        Ok(&self.get(entity_type)?.attributes)
    }

    pub fn methods(&self, entity_type: &EntityType) -> Result<&Methods, EngineError> {
        Ok(&self.get(entity_type)?.methods)
    }

    /// The schema node for `path`, if the entity type is loaded and describes it.
    pub fn node(&self, entity_type: &EntityType, path: &FieldPath) -> Option<&FieldSchemaNode> {
        self.entries.get(entity_type)?.attributes.get(path)
    }
}
