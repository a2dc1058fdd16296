use std::fmt;

use serde::{Deserialize, Serialize};

use formkeep_core::{EntityId, EntityType, FieldValue, SectionName};

use crate::error::StorageError;

/// Suffix of the per-entity-type key that remembers which entity the stored
/// section payloads belong to.
pub const MARKER_SUFFIX: &str = "id";

/// A deterministic storage key derived from entity type and section name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// `"<entityType>:<sectionName>"`
    pub fn section(entity_type: &EntityType, section: &SectionName) -> Self {
        Self(format!("{}:{}", entity_type, section))
    }

    /// `"<entityType>:id"`
    pub fn entity_marker(entity_type: &EntityType) -> Self {
        Self(format!("{}:{}", entity_type, MARKER_SUFFIX))
    }

    /// `"<entityType>:"`, the prefix shared by every key of one entity type.
    pub fn prefix(entity_type: &EntityType) -> String {
        format!("{}:", entity_type)
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted payload of one dirty section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub entity_id: EntityId,
    pub values: FieldValue,
    pub saved_at_ms: u64,
}

/// The last-known entity id for an entity type, read before any section
/// payload during restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMarker {
    pub entity_id: EntityId,
    pub saved_at_ms: u64,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Durable, keyed, global local storage. All access is single-threaded.
pub trait SnapshotStore {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&mut self, key: &StorageKey, payload: &[u8]) -> Result<(), StorageError>;

    /// Returns whether a value was present.
    fn remove(&mut self, key: &StorageKey) -> Result<bool, StorageError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<StorageKey>, StorageError>;

    fn put_section_record(
        &mut self,
        entity_type: &EntityType,
        section: &SectionName,
        record: &SectionRecord,
    ) -> Result<(), StorageError> {
        let bytes = encode(record)?;
        self.put(&StorageKey::section(entity_type, section), &bytes)
    }

    fn section_record(
        &self,
        entity_type: &EntityType,
        section: &SectionName,
    ) -> Result<Option<SectionRecord>, StorageError> {
        match self.get(&StorageKey::section(entity_type, section))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove_section_record(
        &mut self,
        entity_type: &EntityType,
        section: &SectionName,
    ) -> Result<bool, StorageError> {
        self.remove(&StorageKey::section(entity_type, section))
    }

    fn put_marker(&mut self, entity_type: &EntityType, marker: &EntityMarker) -> Result<(), StorageError> {
        let bytes = encode(marker)?;
        self.put(&StorageKey::entity_marker(entity_type), &bytes)
    }

    fn marker(&self, entity_type: &EntityType) -> Result<Option<EntityMarker>, StorageError> {
        match self.get(&StorageKey::entity_marker(entity_type))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove every key stored for `entity_type`. Returns how many were removed.
    fn clear_entity_type(&mut self, entity_type: &EntityType) -> Result<usize, StorageError> {
        let keys = self.keys_with_prefix(&StorageKey::prefix(entity_type))?;
        let mut removed = 0;
        for key in &keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&mut self, key: &StorageKey, payload: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, payload)
    }

    fn remove(&mut self, key: &StorageKey) -> Result<bool, StorageError> {
        (**self).remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<StorageKey>, StorageError> {
        (**self).keys_with_prefix(prefix)
    }
}
