//! Field resolution: schema node + permission map -> effective configuration.

use formkeep_core::{Attributes, Choice, FieldKind, FieldPath, Methods, Verb};

/// Everything a field binding needs to know about one field, derived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFieldConfig {
    pub path: FieldPath,
    pub kind: FieldKind,
    pub required: bool,
    pub label: String,
    pub can_read: bool,
    pub can_write: bool,
}

impl EffectiveFieldConfig {
    pub fn choices(&self) -> &[Choice] {
        self.kind.choices()
    }
}

/// Outcome of resolving a path. An undescribed path is a value, not an
/// error: schemas may lag the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Described(EffectiveFieldConfig),
    NotDescribed,
}

impl Resolution {
    pub fn config(&self) -> Option<&EffectiveFieldConfig> {
        match self {
            Resolution::Described(config) => Some(config),
            Resolution::NotDescribed => None,
        }
    }

    pub fn into_config(self) -> Option<EffectiveFieldConfig> {
        match self {
            Resolution::Described(config) => Some(config),
            Resolution::NotDescribed => None,
        }
    }

    pub fn can_read(&self) -> bool {
        self.config().is_some_and(|c| c.can_read)
    }

    pub fn can_write(&self) -> bool {
        self.config().is_some_and(|c| c.can_write)
    }
}

/// `can_read` requires a schema entry and GET on the entity;
/// `can_write = can_read && PATCH && !read_only`.
pub fn resolve(attributes: &Attributes, methods: &Methods, path: &FieldPath) -> Resolution {
    let Some(node) = attributes.get(path) else {
        return Resolution::NotDescribed;
    };
    let can_read = methods.allows(Verb::Get);
    let can_write = can_read && methods.allows(Verb::Patch) && !node.read_only;
    Resolution::Described(EffectiveFieldConfig {
        path: path.clone(),
        kind: node.kind.clone(),
        required: node.required,
        label: node.label.clone(),
        can_read,
        can_write,
    })
}

/// Entity-level create/edit/delete gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityAffordances {
    pub can_create: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

impl EntityAffordances {
    pub fn from_methods(methods: &Methods) -> Self {
        Self {
            can_create: methods.allows(Verb::Post),
            can_edit: methods.allows(Verb::Patch),
            can_delete: methods.allows(Verb::Delete),
        }
    }
}
