use std::collections::BTreeMap;

use serde_json::Value as Json;

use formkeep_core::{Attributes, EntityId, EntityType, FieldPath, FieldValue, Methods};

use crate::error::EngineError;

/// An entity as returned by the backend: its id and its full value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub values: FieldValue,
}

/// Field-level and page-level messages from a rejected save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveRejection {
    pub field_errors: BTreeMap<FieldPath, Vec<String>>,
    pub non_field_errors: Vec<String>,
}

impl SaveRejection {
    pub fn field(path: FieldPath, message: impl Into<String>) -> Self {
        let mut rejection = Self::default();
        rejection.field_errors.insert(path, vec![message.into()]);
        rejection
    }

    pub fn page(message: impl Into<String>) -> Self {
        Self {
            field_errors: BTreeMap::new(),
            non_field_errors: vec![message.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    /// Flatten the backend's validation error body. `non_field_errors` and
    /// `detail` are page-level; nested objects become dotted paths and lists
    /// of objects become indexed paths.
    pub fn from_json(body: &Json) -> Self {
        let mut rejection = Self::default();
        match body {
            Json::Object(map) => {
                for (key, value) in map {
                    if key == "non_field_errors" || key == "detail" {
                        collect_messages(value, &mut rejection.non_field_errors);
                    } else {
                        rejection.walk(FieldPath::key(key), value);
                    }
                }
            }
            other => collect_messages(other, &mut rejection.non_field_errors),
        }
        rejection
    }

    fn walk(&mut self, path: FieldPath, value: &Json) {
        match value {
            Json::Object(map) => {
                for (key, child) in map {
                    self.walk(path.child(key), child);
                }
            }
            Json::Array(items) if items.iter().all(|i| !i.is_object()) => {
                let mut messages = Vec::new();
                collect_messages(value, &mut messages);
                if !messages.is_empty() {
                    self.field_errors.entry(path).or_default().extend(messages);
                }
            }
            Json::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(path.index(i), item);
                }
            }
            Json::Null => {}
            other => {
                let mut messages = Vec::new();
                collect_messages(other, &mut messages);
                self.field_errors.entry(path).or_default().extend(messages);
            }
        }
    }
}

fn collect_messages(value: &Json, out: &mut Vec<String>) {
    match value {
        Json::String(s) => out.push(s.clone()),
        Json::Array(items) => {
            for item in items {
                collect_messages(item, out);
            }
        }
        Json::Null => {}
        other => out.push(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResponse {
    Saved(EntityRecord),
    Rejected(SaveRejection),
}

/// The backend collaborator: schema, permissions and entity CRUD.
/// Transport, authentication and retries live behind this trait.
pub trait Backend {
    fn schema(&mut self, entity_type: &EntityType) -> Result<Attributes, EngineError>;

    fn permissions(&mut self, entity_type: &EntityType) -> Result<Methods, EngineError>;

    fn fetch(&mut self, entity_type: &EntityType, id: EntityId) -> Result<EntityRecord, EngineError>;

    fn patch(
        &mut self,
        entity_type: &EntityType,
        id: EntityId,
        payload: &FieldValue,
    ) -> Result<SaveResponse, EngineError>;

    fn create(&mut self, entity_type: &EntityType, payload: &FieldValue) -> Result<SaveResponse, EngineError>;
}
