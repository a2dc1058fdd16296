use formkeep_core::{EntityId, EntityType, FieldValue, SectionName};
use formkeep_storage::{MARKER_SUFFIX, SectionRecord, SnapshotStore, StorageKey};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    NoSnapshot,
    PromptingRestore,
    Restored,
    Discarded,
}

/// Snapshot payloads found for the loaded entity: layout sections in
/// registration order, then sections opened during the session by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub entity_id: EntityId,
    pub sections: Vec<(SectionName, SectionRecord)>,
}

impl PendingSnapshot {
    pub fn section(&self, name: &SectionName) -> Option<&SectionRecord> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// All section payloads folded into one tree. Later sections win on
    /// conflicting paths.
    pub fn merged(&self) -> FieldValue {
        let mut merged = FieldValue::object();
        for (_, record) in &self.sections {
            merged.merge_deep(&record.values);
        }
        merged
    }
}

/// Decides, once per page load, whether a prior snapshot may be offered.
#[derive(Debug)]
pub struct RestoreFlow {
    entity_type: EntityType,
    state: RestoreState,
    pending: Option<PendingSnapshot>,
}

impl RestoreFlow {
    /// Look for a snapshot of `loaded_id`. The stored entity marker is read
    /// before any section payload; a snapshot for another entity is deleted.
    /// Stored sections outside `section_names` are offered after them.
    pub fn detect<S: SnapshotStore + ?Sized>(
        store: &mut S,
        entity_type: &EntityType,
        loaded_id: EntityId,
        section_names: &[SectionName],
    ) -> Result<Self, EngineError> {
        let mut flow = Self {
            entity_type: entity_type.clone(),
            state: RestoreState::NoSnapshot,
            pending: None,
        };

        let marker = match store.marker(entity_type) {
            Ok(marker) => marker,
            Err(error) => {
                tracing::warn!(entity_type = %entity_type, error = %error, "unreadable snapshot marker");
                None
            }
        };

        let Some(marker) = marker else {
            // Section payloads without a marker cannot be attributed to an entity.
            let removed = store.clear_entity_type(entity_type)?;
            if removed > 0 {
                tracing::info!(entity_type = %entity_type, removed, "orphaned snapshot keys removed");
            }
            return Ok(flow);
        };

        if marker.entity_id != loaded_id {
            let removed = store.clear_entity_type(entity_type)?;
            tracing::info!(
                entity_type = %entity_type,
                stored = %marker.entity_id,
                loaded = %loaded_id,
                removed,
                "snapshot belongs to another entity, removed"
            );
            return Ok(flow);
        }

        let prefix = StorageKey::prefix(entity_type);
        let mut names = section_names.to_vec();
        for key in store.keys_with_prefix(&prefix)? {
            let Some(suffix) = key.as_str().strip_prefix(prefix.as_str()) else {
                continue;
            };
            let name = SectionName::new(suffix);
            if suffix != MARKER_SUFFIX && !names.contains(&name) {
                names.push(name);
            }
        }

        let mut sections = Vec::new();
        for name in &names {
            match store.section_record(entity_type, name) {
                Ok(Some(record)) if record.entity_id == loaded_id => sections.push((name.clone(), record)),
                Ok(Some(_)) => {
                    store.remove_section_record(entity_type, name)?;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(entity_type = %entity_type, section = %name, error = %error, "unreadable section snapshot");
                }
            }
        }

        if sections.is_empty() {
            store.clear_entity_type(entity_type)?;
            return Ok(flow);
        }

        tracing::info!(
            entity_type = %entity_type,
            entity_id = %loaded_id,
            sections = sections.len(),
            "snapshot found, prompting for restore"
        );
        flow.state = RestoreState::PromptingRestore;
        flow.pending = Some(PendingSnapshot {
            entity_id: loaded_id,
            sections,
        });
        Ok(flow)
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    pub fn is_prompting(&self) -> bool {
        self.state == RestoreState::PromptingRestore
    }

    pub fn pending(&self) -> Option<&PendingSnapshot> {
        self.pending.as_ref()
    }

    /// Accept the snapshot. The keys stay in storage; the restarted scheduler
    /// owns them from here on.
    pub fn restore(&mut self) -> Result<PendingSnapshot, EngineError> {
        if !self.is_prompting() {
            return Err(EngineError::NoPendingRestore);
        }
        let pending = self.pending.take().ok_or(EngineError::NoPendingRestore)?;
        self.state = RestoreState::Restored;
        tracing::info!(entity_type = %self.entity_type, entity_id = %pending.entity_id, "snapshot restored");
        Ok(pending)
    }

    /// Reject the snapshot and delete every key stored for the entity type.
    pub fn discard<S: SnapshotStore + ?Sized>(&mut self, store: &mut S) -> Result<usize, EngineError> {
        if !self.is_prompting() {
            return Err(EngineError::NoPendingRestore);
        }
        let removed = store.clear_entity_type(&self.entity_type)?;
        self.pending = None;
        self.state = RestoreState::Discarded;
        tracing::info!(entity_type = %self.entity_type, removed, "snapshot discarded");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formkeep_storage::{EntityMarker, MemoryStore, StorageKey};

    fn lease() -> EntityType {
        EntityType::new("lease")
    }

    fn basic() -> SectionName {
        SectionName::new("basic")
    }

    fn seed(store: &mut MemoryStore, id: u64) {
        let id = EntityId::new(id);
        store
            .put_marker(&lease(), &EntityMarker { entity_id: id, saved_at_ms: 5_000 })
            .unwrap();
        let record = SectionRecord {
            entity_id: id,
            values: FieldValue::object_from([("start_date", FieldValue::from("2024-01-01"))]),
            saved_at_ms: 5_000,
        };
        store.put_section_record(&lease(), &basic(), &record).unwrap();
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let mut store = MemoryStore::new();
        let flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[basic()]).unwrap();
        assert_eq!(flow.state(), RestoreState::NoSnapshot);
    }

    #[test]
    fn matching_identity_prompts() {
        let mut store = MemoryStore::new();
        seed(&mut store, 42);
        let flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[basic()]).unwrap();
        assert!(flow.is_prompting());
        let pending = flow.pending().unwrap();
        assert_eq!(
            pending.section(&basic()).unwrap().values,
            FieldValue::object_from([("start_date", FieldValue::from("2024-01-01"))])
        );
    }

    #[test]
    fn identity_mismatch_deletes_snapshot() {
        let mut store = MemoryStore::new();
        seed(&mut store, 7);
        let flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(8), &[basic()]).unwrap();
        assert_eq!(flow.state(), RestoreState::NoSnapshot);
        assert!(store.is_empty());
    }

    #[test]
    fn marker_without_sections_is_no_snapshot() {
        let mut store = MemoryStore::new();
        store
            .put_marker(&lease(), &EntityMarker { entity_id: EntityId::new(42), saved_at_ms: 0 })
            .unwrap();
        let flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[basic()]).unwrap();
        assert_eq!(flow.state(), RestoreState::NoSnapshot);
        assert!(!store.contains(&StorageKey::entity_marker(&lease())));
    }

    #[test]
    fn sections_outside_the_layout_are_offered_last() {
        let mut store = MemoryStore::new();
        seed(&mut store, 42);
        let extra = SectionName::new("attachments");
        let record = SectionRecord {
            entity_id: EntityId::new(42),
            values: FieldValue::object_from([("note", FieldValue::from("draft"))]),
            saved_at_ms: 5_000,
        };
        store.put_section_record(&lease(), &extra, &record).unwrap();

        let rent = SectionName::new("rent");
        let flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[rent, basic()]).unwrap();
        let names: Vec<_> = flow.pending().unwrap().sections.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec![basic(), extra]);
    }

    #[test]
    fn restore_and_discard_are_terminal() {
        let mut store = MemoryStore::new();
        seed(&mut store, 42);
        let mut flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[basic()]).unwrap();
        flow.restore().unwrap();
        assert_eq!(flow.state(), RestoreState::Restored);
        assert!(matches!(flow.restore(), Err(EngineError::NoPendingRestore)));
        assert!(matches!(flow.discard(&mut store), Err(EngineError::NoPendingRestore)));

        let mut flow = RestoreFlow::detect(&mut store, &lease(), EntityId::new(42), &[basic()]).unwrap();
        assert_eq!(flow.discard(&mut store).unwrap(), 2);
        assert_eq!(flow.state(), RestoreState::Discarded);
        assert!(store.is_empty());
        assert!(matches!(flow.restore(), Err(EngineError::NoPendingRestore)));
    }

    #[test]
    fn later_sections_win_in_merged_view() {
        let pending = PendingSnapshot {
            entity_id: EntityId::new(1),
            sections: vec![
                (
                    SectionName::new("a"),
                    SectionRecord {
                        entity_id: EntityId::new(1),
                        values: FieldValue::object_from([("note", FieldValue::from("first"))]),
                        saved_at_ms: 0,
                    },
                ),
                (
                    SectionName::new("b"),
                    SectionRecord {
                        entity_id: EntityId::new(1),
                        values: FieldValue::object_from([("note", FieldValue::from("second"))]),
                        saved_at_ms: 0,
                    },
                ),
            ],
        };
        assert_eq!(
            pending.merged(),
            FieldValue::object_from([("note", FieldValue::from("second"))])
        );
    }
}
