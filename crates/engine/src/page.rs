//! Page-level orchestration for one entity: mount, restore prompt, edit
//! session with autosave, save and cancel.

use formkeep_core::{Clock, EditSessionId, EntityId, EntityType, FieldPath, FieldValue, SectionName, Verb};
use formkeep_storage::SnapshotStore;

use crate::backend::{Backend, EntityRecord, SaveResponse};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::field::{FieldBinding, bind_required};
use crate::resolver::{EntityAffordances, Resolution, resolve};
use crate::restore::{RestoreFlow, RestoreState};
use crate::scheduler::{SchedulerHandle, SnapshotScheduler, TickReport};
use crate::schema_store::{EntitySchema, SchemaStore};
use crate::section::{PageAggregate, SectionArena, SectionView, WriteOutcome};

/// A section of the page and the top-level entity fields it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLayout {
    pub name: SectionName,
    pub fields: Vec<String>,
}

impl SectionLayout {
    pub fn new<I, F>(name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            name: SectionName::new(name),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The part of `entity` this section edits. Missing fields start as null.
    pub fn project(&self, entity: &FieldValue) -> FieldValue {
        let fields = entity.as_object();
        FieldValue::object_from(self.fields.iter().map(|f| {
            let value = fields.and_then(|o| o.get(f)).cloned().unwrap_or_default();
            (f.clone(), value)
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    Viewing,
    Editing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(EntityRecord),
    /// Nothing was dirty; no request was sent.
    NothingToSave,
}

struct EditSession {
    id: EditSessionId,
    handle: Option<SchedulerHandle>,
}

struct Mounted {
    entity_type: EntityType,
    record: EntityRecord,
    layout: Vec<SectionLayout>,
    restore: RestoreFlow,
    scheduler: SnapshotScheduler,
    arena: SectionArena,
    session: Option<EditSession>,
    page_errors: Vec<String>,
    /// Restored payloads of sections not opened yet, applied by `open_section`.
    deferred: Vec<(SectionName, FieldValue)>,
}

impl Mounted {
    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(handle) = session.handle {
                handle.stop();
            }
        }
        self.scheduler.stop();
    }
}

pub struct FormPage<B: Backend, S: SnapshotStore> {
    backend: B,
    store: S,
    config: EngineConfig,
    schemas: SchemaStore,
    mounted: Option<Mounted>,
}

impl<B: Backend, S: SnapshotStore> FormPage<B, S> {
    pub fn new(backend: B, store: S, config: EngineConfig) -> Self {
        Self {
            backend,
            store,
            config,
            schemas: SchemaStore::new(),
            mounted: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Unmount and hand back the collaborators, e.g. to simulate a reload.
    pub fn into_parts(mut self) -> (B, S) {
        self.unmount();
        (self.backend, self.store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    pub fn schemas_mut(&mut self) -> &mut SchemaStore {
        &mut self.schemas
    }

    fn mounted(&self) -> Result<&Mounted, EngineError> {
        self.mounted.as_ref().ok_or(EngineError::NotMounted)
    }

    fn mounted_mut(&mut self) -> Result<&mut Mounted, EngineError> {
        self.mounted.as_mut().ok_or(EngineError::NotMounted)
    }

    fn editing_mut(&mut self) -> Result<&mut Mounted, EngineError> {
        let mounted = self.mounted_mut()?;
        if mounted.session.is_none() {
            return Err(EngineError::NotEditing);
        }
        Ok(mounted)
    }

    fn schema(&self) -> Result<&EntitySchema, EngineError> {
        self.schemas.get(&self.mounted()?.entity_type)
    }

    /// Load schema, permissions and the entity, then check for a snapshot.
    /// Any previously mounted entity is unmounted first.
    pub fn mount(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
        layout: Vec<SectionLayout>,
    ) -> Result<RestoreState, EngineError> {
        self.unmount();
        self.schemas.ensure_loaded(&entity_type, &mut self.backend)?;
        let record = self.backend.fetch(&entity_type, id)?;
        let names: Vec<SectionName> = layout.iter().map(|l| l.name.clone()).collect();
        let restore = RestoreFlow::detect(&mut self.store, &entity_type, record.id, &names)?;
        let state = restore.state();
        tracing::debug!(entity_type = %entity_type, entity_id = %record.id, ?state, "page mounted");
        self.mounted = Some(Mounted {
            scheduler: SnapshotScheduler::new(entity_type.clone(), self.config.autosave.interval_ms),
            entity_type,
            record,
            layout,
            restore,
            arena: SectionArena::new(),
            session: None,
            page_errors: Vec::new(),
            deferred: Vec::new(),
        });
        Ok(state)
    }

    /// Stop autosave and drop page state. The snapshot stays for the next load.
    pub fn unmount(&mut self) {
        if let Some(mut mounted) = self.mounted.take() {
            mounted.stop_session();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn entity(&self) -> Result<&EntityRecord, EngineError> {
        Ok(&self.mounted()?.record)
    }

    pub fn mode(&self) -> PageMode {
        match &self.mounted {
            Some(m) if m.session.is_some() => PageMode::Editing,
            _ => PageMode::Viewing,
        }
    }

    pub fn restore_state(&self) -> Result<RestoreState, EngineError> {
        Ok(self.mounted()?.restore.state())
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.mounted.as_ref().is_some_and(|m| m.restore.is_prompting())
    }

    pub fn affordances(&self) -> Result<EntityAffordances, EngineError> {
        Ok(EntityAffordances::from_methods(&self.schema()?.methods))
    }

    pub fn resolve(&self, path: &FieldPath) -> Result<Resolution, EngineError> {
        let schema = self.schema()?;
        Ok(resolve(&schema.attributes, &schema.methods, path))
    }

    /// Enter edit mode from the entity's current values.
    pub fn enter_edit(&mut self, now_ms: u64) -> Result<(), EngineError> {
        let mounted = self.mounted()?;
        if mounted.session.is_some() {
            return Err(EngineError::AlreadyEditing);
        }
        if mounted.restore.is_prompting() {
            return Err(EngineError::RestorePending);
        }
        self.begin_session(now_ms)
    }

    fn begin_session(&mut self, now_ms: u64) -> Result<(), EngineError> {
        let autosave = self.config.autosave.enabled;
        let mounted = self.mounted.as_ref().ok_or(EngineError::NotMounted)?;
        if !self.schemas.methods(&mounted.entity_type)?.allows(Verb::Patch) {
            return Err(EngineError::EditNotPermitted(mounted.entity_type.to_string()));
        }

        let schema = self.schemas.get(&mounted.entity_type)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        mounted.arena.clear();
        mounted.page_errors.clear();
        mounted.deferred.clear();
        for layout in &mounted.layout {
            mounted
                .arena
                .register_section(layout.name.clone(), layout.project(&mounted.record.values))?;
            bind_required(schema, &mut mounted.arena, &layout.name)?;
        }

        let id = EditSessionId::new();
        let handle = if autosave {
            Some(mounted.scheduler.start(id, mounted.record.id, now_ms)?)
        } else {
            None
        };
        mounted.session = Some(EditSession { id, handle });
        tracing::info!(entity_type = %mounted.entity_type, entity_id = %mounted.record.id, session = %id, "edit session started");
        Ok(())
    }

    /// Accept the pending snapshot: enter edit mode and overlay the stored
    /// section values on the server values.
    pub fn restore(&mut self, now_ms: u64) -> Result<(), EngineError> {
        let mounted = self.mounted()?;
        if !mounted.restore.is_prompting() {
            return Err(EngineError::NoPendingRestore);
        }
        let entity_type = mounted.entity_type.clone();
        if !self.schemas.methods(&entity_type)?.allows(Verb::Patch) {
            return Err(EngineError::EditNotPermitted(entity_type.to_string()));
        }

        let pending = self.mounted_mut()?.restore.restore()?;
        self.begin_session(now_ms)?;
        let schema = self.schemas.get(&entity_type)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        for (name, record) in pending.sections {
            if mounted.arena.contains(&name) {
                mounted.arena.overlay_section(&name, &record.values)?;
                bind_required(schema, &mut mounted.arena, &name)?;
            } else {
                mounted.deferred.push((name, record.values));
            }
        }
        Ok(())
    }

    /// Reject the pending snapshot. The page stays read-only.
    pub fn discard(&mut self) -> Result<(), EngineError> {
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        mounted.restore.discard(&mut self.store)?;
        Ok(())
    }

    /// Register an extra section during an edit session. A restored
    /// snapshot of the same name is overlaid on `initial_values`.
    pub fn open_section(&mut self, name: SectionName, initial_values: FieldValue) -> Result<(), EngineError> {
        let entity_type = self.editing_mut()?.entity_type.clone();
        let schema = self.schemas.get(&entity_type)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        mounted.arena.register_section(name.clone(), initial_values)?;
        if let Some(index) = mounted.deferred.iter().position(|(n, _)| n == &name) {
            let (_, values) = mounted.deferred.remove(index);
            mounted.arena.overlay_section(&name, &values)?;
            tracing::debug!(section = %name, "restored snapshot applied to opened section");
        }
        bind_required(schema, &mut mounted.arena, &name)
    }

    pub fn section(&self, name: &SectionName) -> Result<SectionView, EngineError> {
        self.mounted()?.arena.view(name)
    }

    pub fn sections(&self) -> Result<&SectionArena, EngineError> {
        Ok(&self.mounted()?.arena)
    }

    pub fn aggregate(&self) -> Result<PageAggregate, EngineError> {
        Ok(self.mounted()?.arena.get_aggregate())
    }

    /// Page-level messages from the last rejected save.
    pub fn page_errors(&self) -> &[String] {
        self.mounted.as_ref().map(|m| m.page_errors.as_slice()).unwrap_or(&[])
    }

    pub fn bind(&mut self, section: &SectionName, path: &FieldPath) -> Result<Option<FieldBinding>, EngineError> {
        let entity_type = self.editing_mut()?.entity_type.clone();
        let schema = self.schemas.get(&entity_type)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        FieldBinding::bind(schema, &mut mounted.arena, section, path)
    }

    /// Write a field, resolving permissions first. Writes to hidden or
    /// read-only fields are dropped. A written field's validator is
    /// registered with the section, as are those of new list items.
    pub fn set_field(
        &mut self,
        section: &SectionName,
        path: &FieldPath,
        value: FieldValue,
    ) -> Result<WriteOutcome, EngineError> {
        let entity_type = self.editing_mut()?.entity_type.clone();
        let schema = self.schemas.get(&entity_type)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        let config = match resolve(&schema.attributes, &schema.methods, path).into_config() {
            Some(config) if config.can_write => config,
            Some(config) if config.can_read => return Ok(WriteOutcome::ReadOnly),
            _ => return Ok(WriteOutcome::Hidden),
        };

        let outcome = mounted.arena.write_field(section, path, value)?;
        mounted.arena.bind_field(section, config)?;
        if outcome == WriteOutcome::Applied {
            bind_required(schema, &mut mounted.arena, section)?;
        }
        Ok(outcome)
    }

    /// Run the due autosave tick, if any, against the current section state.
    pub fn poll(&mut self, now_ms: u64) -> Result<Option<TickReport>, EngineError> {
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        let Some(ticket) = mounted.scheduler.poll(now_ms) else {
            return Ok(None);
        };
        Ok(Some(mounted.scheduler.fire(ticket, &mounted.arena, &mut self.store, now_ms)))
    }

    pub fn tick(&mut self, clock: &dyn Clock) -> Result<Option<TickReport>, EngineError> {
        let now_ms = clock.now_ms()?;
        self.poll(now_ms)
    }

    pub fn should_confirm_leave(&self) -> bool {
        self.mounted
            .as_ref()
            .is_some_and(|m| m.session.is_some() && m.arena.get_aggregate().any_dirty)
    }

    /// Send the dirty sections to the backend.
    pub fn save(&mut self) -> Result<SaveOutcome, EngineError> {
        let mounted = self.editing_mut()?;
        mounted.arena.mark_save_attempted();
        mounted.arena.clear_rejections();
        mounted.page_errors.clear();

        let aggregate = mounted.arena.get_aggregate();
        if !aggregate.all_valid {
            let invalid = mounted
                .arena
                .invalid_sections()
                .into_iter()
                .map(|n| n.to_string())
                .collect();
            return Err(EngineError::InvalidSections(invalid));
        }
        if !aggregate.any_dirty {
            return Ok(SaveOutcome::NothingToSave);
        }

        let mut payload = FieldValue::object();
        for section in mounted.arena.dirty_sections() {
            payload.merge_deep(section.values());
        }
        let entity_type = mounted.entity_type.clone();
        let id = mounted.record.id;

        let response = self.backend.patch(&entity_type, id, &payload)?;
        let mounted = self.mounted.as_mut().ok_or(EngineError::NotMounted)?;
        match response {
            SaveResponse::Saved(record) => {
                mounted.record = record.clone();
                for layout in &mounted.layout {
                    mounted
                        .arena
                        .rebase_section(&layout.name, layout.project(&record.values))?;
                }
                mounted.arena.clear_save_attempted();
                mounted.stop_session();
                if let Err(error) = self.store.clear_entity_type(&entity_type) {
                    tracing::warn!(entity_type = %entity_type, error = %error, "snapshot cleanup after save failed");
                }
                tracing::info!(entity_type = %entity_type, entity_id = %id, "entity saved");
                Ok(SaveOutcome::Saved(record))
            }
            SaveResponse::Rejected(rejection) => {
                mounted.page_errors = mounted.arena.apply_rejection(&rejection);
                tracing::debug!(
                    entity_type = %entity_type,
                    field_errors = rejection.field_errors.len(),
                    "save rejected"
                );
                Err(EngineError::SaveRejected(rejection))
            }
        }
    }

    /// Abandon the edit session: sections return to their baselines and the
    /// snapshot keys are removed.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        let mounted = self.editing_mut()?;
        let names: Vec<SectionName> = mounted.arena.names().to_vec();
        for name in &names {
            mounted.arena.reset_section(name)?;
        }
        mounted.arena.clear_save_attempted();
        mounted.stop_session();
        mounted.page_errors.clear();
        let entity_type = mounted.entity_type.clone();
        if let Err(error) = self.store.clear_entity_type(&entity_type) {
            tracing::warn!(entity_type = %entity_type, error = %error, "snapshot cleanup after cancel failed");
        }
        tracing::info!(entity_type = %entity_type, "edit session cancelled");
        Ok(())
    }

    /// Create a new entity of the mounted type. Requires POST.
    pub fn create(&mut self, payload: &FieldValue) -> Result<SaveResponse, EngineError> {
        let entity_type = self.mounted()?.entity_type.clone();
        if !self.affordances()?.can_create {
            return Err(EngineError::EditNotPermitted(entity_type.to_string()));
        }
        self.backend.create(&entity_type, payload)
    }
}
