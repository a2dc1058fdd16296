use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::traits::{SnapshotStore, StorageKey};

/// In-process snapshot store with an optional byte quota, modelled on
/// browser local storage: a write that does not fit fails and leaves the
/// previous value in place.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<StorageKey, Vec<u8>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn set_quota(&mut self, quota_bytes: Option<usize>) {
        self.quota_bytes = quota_bytes;
    }

    /// Bytes in use, counting keys and payloads.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.entries.contains_key(key)
    }
}

fn entry_size(key: &StorageKey, payload: &[u8]) -> usize {
    key.as_str().len() + payload.len()
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &StorageKey, payload: &[u8]) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .entries
                .get(key)
                .map(|old| entry_size(key, old))
                .unwrap_or(0);
            let others = self.used_bytes() - replaced;
            let needed = entry_size(key, payload);
            if others + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(others),
                });
            }
        }
        self.entries.insert(key.clone(), payload.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<StorageKey>, StorageError> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{EntityMarker, SectionRecord};
    use formkeep_core::{EntityId, EntityType, FieldValue, SectionName};

    #[test]
    fn quota_rejects_oversized_write_and_keeps_old_value() {
        let key = StorageKey::from_raw("lease:basic");
        let mut store = MemoryStore::with_quota(32);
        store.put(&key, b"small").unwrap();

        let err = store.put(&key, &[0u8; 64]).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 75, .. }));
        assert_eq!(store.get(&key).unwrap(), Some(b"small".to_vec()));
    }

    #[test]
    fn replacing_a_value_frees_its_old_size() {
        let key = StorageKey::from_raw("k");
        let mut store = MemoryStore::with_quota(10);
        store.put(&key, &[1u8; 9]).unwrap();
        store.put(&key, &[2u8; 9]).unwrap();
        assert_eq!(store.used_bytes(), 10);
    }

    #[test]
    fn typed_records_and_prefix_clear() {
        let lease = EntityType::new("lease");
        let area = EntityType::new("lease_area");
        let basic = SectionName::new("basic");
        let mut store = MemoryStore::new();

        let record = SectionRecord {
            entity_id: EntityId::new(42),
            values: FieldValue::object_from([("start_date", FieldValue::from("2024-01-01"))]),
            saved_at_ms: 5_000,
        };
        store.put_section_record(&lease, &basic, &record).unwrap();
        store
            .put_marker(&lease, &EntityMarker { entity_id: EntityId::new(42), saved_at_ms: 5_000 })
            .unwrap();
        store
            .put_marker(&area, &EntityMarker { entity_id: EntityId::new(1), saved_at_ms: 5_000 })
            .unwrap();

        assert_eq!(store.section_record(&lease, &basic).unwrap(), Some(record));
        assert_eq!(store.marker(&lease).unwrap().unwrap().entity_id, EntityId::new(42));

        assert_eq!(store.clear_entity_type(&lease).unwrap(), 2);
        assert!(store.marker(&lease).unwrap().is_none());
        assert!(store.marker(&area).unwrap().is_some());
    }
}
