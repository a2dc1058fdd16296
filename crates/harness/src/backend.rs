use std::collections::BTreeMap;

use formkeep_core::{Attributes, EntityId, EntityType, FieldValue, Methods};
use formkeep_engine::{Backend, EngineError, EntityRecord, SaveRejection, SaveResponse};

/// In-process backend holding schemas, permissions and entities.
#[derive(Debug, Default)]
pub struct FakeBackend {
    schemas: BTreeMap<EntityType, Attributes>,
    methods: BTreeMap<EntityType, Methods>,
    entities: BTreeMap<(EntityType, EntityId), FieldValue>,
    next_id: u64,
    reject_next: Option<SaveRejection>,
    fail_next: Option<String>,
    schema_fetches: usize,
    patches: Vec<(EntityType, EntityId, FieldValue)>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn register_type(&mut self, entity_type: &EntityType, attributes: Attributes, methods: Methods) {
        self.schemas.insert(entity_type.clone(), attributes);
        self.methods.insert(entity_type.clone(), methods);
    }

    pub fn set_methods(&mut self, entity_type: &EntityType, methods: Methods) {
        self.methods.insert(entity_type.clone(), methods);
    }

    pub fn insert_entity(&mut self, entity_type: &EntityType, id: EntityId, values: FieldValue) {
        self.next_id = self.next_id.max(id.get() + 1);
        self.entities.insert((entity_type.clone(), id), values);
    }

    pub fn entity(&self, entity_type: &EntityType, id: EntityId) -> Option<&FieldValue> {
        self.entities.get(&(entity_type.clone(), id))
    }

    /// The next `patch` answers with this rejection instead of saving.
    pub fn reject_next_save(&mut self, rejection: SaveRejection) {
        self.reject_next = Some(rejection);
    }

    /// The next call of any kind fails with a transport error.
    pub fn fail_next_call(&mut self, message: &str) {
        self.fail_next = Some(message.to_string());
    }

    pub fn schema_fetches(&self) -> usize {
        self.schema_fetches
    }

    pub fn patches(&self) -> &[(EntityType, EntityId, FieldValue)] {
        &self.patches
    }

    fn check_failure(&mut self) -> Result<(), EngineError> {
        match self.fail_next.take() {
            Some(message) => Err(EngineError::Backend(message)),
            None => Ok(()),
        }
    }
}

impl Backend for FakeBackend {
    fn schema(&mut self, entity_type: &EntityType) -> Result<Attributes, EngineError> {
        self.check_failure()?;
        self.schema_fetches += 1;
        self.schemas
            .get(entity_type)
            .cloned()
            .ok_or_else(|| EngineError::Backend(format!("unknown entity type {entity_type}")))
    }

    fn permissions(&mut self, entity_type: &EntityType) -> Result<Methods, EngineError> {
        self.check_failure()?;
        Ok(self.methods.get(entity_type).cloned().unwrap_or_default())
    }

    fn fetch(&mut self, entity_type: &EntityType, id: EntityId) -> Result<EntityRecord, EngineError> {
        self.check_failure()?;
        let values = self
            .entity(entity_type, id)
            .cloned()
            .ok_or_else(|| EngineError::Backend(format!("{entity_type} {id} not found")))?;
        Ok(EntityRecord { id, values })
    }

    fn patch(
        &mut self,
        entity_type: &EntityType,
        id: EntityId,
        payload: &FieldValue,
    ) -> Result<SaveResponse, EngineError> {
        self.check_failure()?;
        self.patches.push((entity_type.clone(), id, payload.clone()));
        if let Some(rejection) = self.reject_next.take() {
            return Ok(SaveResponse::Rejected(rejection));
        }
        let stored = self
            .entities
            .get_mut(&(entity_type.clone(), id))
            .ok_or_else(|| EngineError::Backend(format!("{entity_type} {id} not found")))?;
        stored.merge_deep(payload);
        Ok(SaveResponse::Saved(EntityRecord {
            id,
            values: stored.clone(),
        }))
    }

    fn create(&mut self, entity_type: &EntityType, payload: &FieldValue) -> Result<SaveResponse, EngineError> {
        self.check_failure()?;
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        let mut values = payload.clone();
        values.merge_deep(&FieldValue::object_from([("id", FieldValue::Integer(id.get() as i64))]));
        self.entities.insert((entity_type.clone(), id), values.clone());
        Ok(SaveResponse::Saved(EntityRecord { id, values }))
    }
}
