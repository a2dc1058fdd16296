//! Sections: independently dirty/valid-tracked sub-forms, kept in one arena
//! per page. Page-level flags are folds over the arena.

use std::collections::{BTreeMap, BTreeSet};

use formkeep_core::{FieldPath, FieldValue, SectionName};
use formkeep_storage::MARKER_SUFFIX;

use crate::backend::SaveRejection;
use crate::error::EngineError;
use crate::resolver::EffectiveFieldConfig;
use crate::scheduler::{DirtySectionSource, SectionState};
use crate::validate::{FieldError, validate_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    Dirty,
}

/// Result of writing a field through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The new value equals the current one.
    Unchanged,
    /// The field is visible but not writable; the write was dropped.
    ReadOnly,
    /// The field is not readable (or not described); the write was dropped.
    Hidden,
}

#[derive(Debug, Clone)]
pub struct Section {
    name: SectionName,
    baseline: FieldValue,
    values: FieldValue,
    is_dirty: bool,
    is_valid: bool,
    errors: BTreeMap<FieldPath, FieldError>,
    touched: BTreeSet<FieldPath>,
    bound: BTreeMap<FieldPath, EffectiveFieldConfig>,
}

impl Section {
    fn new(name: SectionName, initial_values: FieldValue) -> Self {
        Self {
            name,
            baseline: initial_values.clone(),
            values: initial_values,
            is_dirty: false,
            is_valid: true,
            errors: BTreeMap::new(),
            touched: BTreeSet::new(),
            bound: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &SectionName {
        &self.name
    }

    pub fn values(&self) -> &FieldValue {
        &self.values
    }

    pub fn baseline(&self) -> &FieldValue {
        &self.baseline
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn state(&self) -> DirtyState {
        if self.is_dirty {
            DirtyState::Dirty
        } else {
            DirtyState::Clean
        }
    }

    /// All current errors, visible or not.
    pub fn errors(&self) -> &BTreeMap<FieldPath, FieldError> {
        &self.errors
    }

    pub fn is_touched(&self, path: &FieldPath) -> bool {
        self.touched.contains(path)
    }

    pub fn is_bound(&self, path: &FieldPath) -> bool {
        self.bound.contains_key(path)
    }

    pub fn value_at(&self, path: &FieldPath) -> Option<&FieldValue> {
        path.get(&self.values)
    }

    fn bind(&mut self, config: EffectiveFieldConfig) {
        let path = config.path.clone();
        self.bound.insert(path.clone(), config);
        self.validate_path(&path);
    }

    fn set_field(&mut self, path: &FieldPath, value: FieldValue) -> Result<WriteOutcome, EngineError> {
        self.touched.insert(path.clone());
        if path.get(&self.values) == Some(&value) {
            return Ok(WriteOutcome::Unchanged);
        }
        let mut values = self.values.clone();
        path.set(&mut values, value)?;
        self.values = values;
        self.is_dirty = self.values != self.baseline;
        // Backend messages describe the values last sent; any edit here drops them.
        self.clear_rejections();

        // Writing a parent replaces its descendants; writing a child changes its ancestors.
        let related: Vec<FieldPath> = self
            .bound
            .keys()
            .filter(|bound| bound.starts_with(path) || path.starts_with(bound))
            .cloned()
            .collect();
        for bound in &related {
            self.validate_path(bound);
        }
        self.is_valid = self.errors.is_empty();
        Ok(WriteOutcome::Applied)
    }

    fn clear_rejections(&mut self) {
        self.errors
            .retain(|_, error| !matches!(error, FieldError::Rejected(_)));
        self.is_valid = self.errors.is_empty();
    }

    fn validate_path(&mut self, path: &FieldPath) {
        let Some(config) = self.bound.get(path) else {
            return;
        };
        // A field inside a missing list item or object has nothing to check.
        let present = path
            .parent()
            .is_none_or(|parent| parent.get(&self.values).is_some_and(|v| !v.is_null()));
        if !present {
            if !matches!(self.errors.get(path), Some(FieldError::Rejected(_))) {
                self.errors.remove(path);
            }
            self.is_valid = self.errors.is_empty();
            return;
        }
        let value = path.get(&self.values).cloned().unwrap_or_default();
        match validate_field(&value, config) {
            Some(error) => {
                self.errors.insert(path.clone(), error);
            }
            None => {
                if !matches!(self.errors.get(path), Some(FieldError::Rejected(_))) {
                    self.errors.remove(path);
                }
            }
        }
        self.is_valid = self.errors.is_empty();
    }

    fn revalidate(&mut self) {
        self.errors.clear();
        let paths: Vec<FieldPath> = self.bound.keys().cloned().collect();
        for path in &paths {
            self.validate_path(path);
        }
        self.is_valid = self.errors.is_empty();
    }

    fn rebase(&mut self, values: FieldValue) {
        self.baseline = values.clone();
        self.values = values;
        self.is_dirty = false;
        self.touched.clear();
        self.revalidate();
    }

    /// Whether a backend error at `path` belongs to this section.
    fn owns(&self, path: &FieldPath) -> bool {
        if self.bound.contains_key(path) {
            return true;
        }
        let key = path.schema_key();
        if self.bound.keys().any(|b| b.schema_key() == key) {
            return true;
        }
        match (path.root_key(), self.values.as_object()) {
            (Some(root), Some(fields)) => fields.contains_key(root),
            _ => false,
        }
    }
}

/// Read model handed to page components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionView {
    pub name: SectionName,
    pub values: FieldValue,
    pub is_dirty: bool,
    pub is_valid: bool,
    /// Errors that may be shown: touched fields, or every field after a save attempt.
    pub errors: BTreeMap<FieldPath, FieldError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAggregate {
    pub any_dirty: bool,
    pub all_valid: bool,
}

impl PageAggregate {
    /// The save gate.
    pub fn can_save(&self) -> bool {
        self.any_dirty && self.all_valid
    }
}

/// All sections of one page, in registration order.
#[derive(Debug, Default)]
pub struct SectionArena {
    order: Vec<SectionName>,
    sections: BTreeMap<SectionName, Section>,
    save_attempted: bool,
}

impl SectionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_section(
        &mut self,
        name: SectionName,
        initial_values: FieldValue,
    ) -> Result<(), EngineError> {
        if name.as_str() == MARKER_SUFFIX {
            return Err(EngineError::ReservedSectionName(name.to_string()));
        }
        if self.sections.contains_key(&name) {
            return Err(EngineError::DuplicateSection(name.to_string()));
        }
        self.order.push(name.clone());
        self.sections
            .insert(name.clone(), Section::new(name, initial_values));
        Ok(())
    }

    /// Overwrite a section's state wholesale.
    pub fn update_section(
        &mut self,
        name: &SectionName,
        values: FieldValue,
        is_dirty: bool,
        is_valid: bool,
        errors: BTreeMap<FieldPath, FieldError>,
    ) -> Result<(), EngineError> {
        let section = self.section_mut(name)?;
        section.values = values;
        section.is_dirty = is_dirty;
        section.is_valid = is_valid;
        section.errors = errors;
        Ok(())
    }

    pub fn get_aggregate(&self) -> PageAggregate {
        PageAggregate {
            any_dirty: self.sections.values().any(|s| s.is_dirty),
            all_valid: self.sections.values().all(|s| s.is_valid),
        }
    }

    /// Discard edits: values return to the baseline, flags reset.
    pub fn reset_section(&mut self, name: &SectionName) -> Result<(), EngineError> {
        let section = self.section_mut(name)?;
        let baseline = section.baseline.clone();
        section.rebase(baseline);
        Ok(())
    }

    /// Adopt the current values as the new baseline after a successful save.
    pub fn commit_section(&mut self, name: &SectionName) -> Result<(), EngineError> {
        let section = self.section_mut(name)?;
        let values = section.values.clone();
        section.rebase(values);
        Ok(())
    }

    /// Replace both baseline and values, e.g. with the server's saved entity.
    pub fn rebase_section(&mut self, name: &SectionName, values: FieldValue) -> Result<(), EngineError> {
        self.section_mut(name)?.rebase(values);
        Ok(())
    }

    /// Overwrite a section's values without touching its baseline, leaving
    /// it dirty when they differ. Used when restoring a snapshot.
    pub fn overlay_section(&mut self, name: &SectionName, overlay: &FieldValue) -> Result<(), EngineError> {
        let section = self.section_mut(name)?;
        section.values.merge_deep(overlay);
        section.is_dirty = section.values != section.baseline;
        section.revalidate();
        Ok(())
    }

    pub fn remove_section(&mut self, name: &SectionName) -> Result<Section, EngineError> {
        let section = self
            .sections
            .remove(name)
            .ok_or_else(|| EngineError::UnknownSection(name.to_string()))?;
        self.order.retain(|n| n != name);
        Ok(section)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.sections.clear();
        self.save_attempted = false;
    }

    pub fn contains(&self, name: &SectionName) -> bool {
        self.sections.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn names(&self) -> &[SectionName] {
        &self.order
    }

    pub fn section(&self, name: &SectionName) -> Result<&Section, EngineError> {
        self.sections
            .get(name)
            .ok_or_else(|| EngineError::UnknownSection(name.to_string()))
    }

    fn section_mut(&mut self, name: &SectionName) -> Result<&mut Section, EngineError> {
        self.sections
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownSection(name.to_string()))
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.order.iter().filter_map(|n| self.sections.get(n))
    }

    pub fn dirty_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections().filter(|s| s.is_dirty)
    }

    pub fn invalid_sections(&self) -> Vec<SectionName> {
        self.sections()
            .filter(|s| !s.is_valid)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Drop every backend rejection so the next save is judged on the
    /// field validators alone.
    pub fn clear_rejections(&mut self) {
        for section in self.sections.values_mut() {
            section.clear_rejections();
        }
    }

    pub fn mark_save_attempted(&mut self) {
        self.save_attempted = true;
    }

    pub fn clear_save_attempted(&mut self) {
        self.save_attempted = false;
    }

    pub fn save_attempted(&self) -> bool {
        self.save_attempted
    }

    /// Errors that may be styled: a field's error shows once it has been
    /// touched, or for every field once a save was attempted.
    pub fn visible_errors(&self, name: &SectionName) -> Result<BTreeMap<FieldPath, FieldError>, EngineError> {
        let section = self.section(name)?;
        Ok(section
            .errors
            .iter()
            .filter(|(path, _)| self.save_attempted || section.touched.contains(*path))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect())
    }

    pub fn visible_error(&self, name: &SectionName, path: &FieldPath) -> Result<Option<FieldError>, EngineError> {
        let section = self.section(name)?;
        if !self.save_attempted && !section.touched.contains(path) {
            return Ok(None);
        }
        Ok(section.errors.get(path).cloned())
    }

    pub fn view(&self, name: &SectionName) -> Result<SectionView, EngineError> {
        let section = self.section(name)?;
        Ok(SectionView {
            name: section.name.clone(),
            values: section.values.clone(),
            is_dirty: section.is_dirty,
            is_valid: section.is_valid,
            errors: self.visible_errors(name)?,
        })
    }

    pub(crate) fn bind_field(&mut self, name: &SectionName, config: EffectiveFieldConfig) -> Result<(), EngineError> {
        self.section_mut(name)?.bind(config);
        Ok(())
    }

    pub(crate) fn write_field(
        &mut self,
        name: &SectionName,
        path: &FieldPath,
        value: FieldValue,
    ) -> Result<WriteOutcome, EngineError> {
        self.section_mut(name)?.set_field(path, value)
    }

    /// Attach backend field errors to the sections that own them. Errors no
    /// section owns are returned as page-level messages, prefixed with the
    /// path.
    pub fn apply_rejection(&mut self, rejection: &SaveRejection) -> Vec<String> {
        let mut page_level = rejection.non_field_errors.clone();
        for (path, messages) in &rejection.field_errors {
            let owner = self
                .order
                .iter()
                .find(|n| self.sections.get(*n).is_some_and(|s| s.owns(path)))
                .cloned();
            match owner.and_then(|n| self.sections.get_mut(&n)) {
                Some(section) => {
                    section
                        .errors
                        .insert(path.clone(), FieldError::Rejected(messages.clone()));
                    section.is_valid = false;
                }
                None => page_level.extend(messages.iter().map(|m| format!("{path}: {m}"))),
            }
        }
        page_level
    }
}

impl DirtySectionSource for SectionArena {
    fn section_states(&self) -> Vec<SectionState> {
        self.sections()
            .map(|s| SectionState {
                name: s.name.clone(),
                is_dirty: s.is_dirty,
                values: s.values.clone(),
            })
            .collect()
    }
}
