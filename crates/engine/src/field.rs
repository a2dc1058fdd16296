use formkeep_core::{FieldPath, FieldValue, SectionName};

use crate::error::EngineError;
use crate::resolver::{EffectiveFieldConfig, resolve};
use crate::schema_store::EntitySchema;
use crate::section::{SectionArena, WriteOutcome};
use crate::validate::FieldError;

/// A field attached to one section. Only readable, described fields can be
/// bound; everything a caller does through the binding respects `can_write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    section: SectionName,
    config: EffectiveFieldConfig,
}

impl FieldBinding {
    /// Resolve `path` and register its validator with `section`. Returns
    /// `None` when the field must not render.
    pub fn bind(
        schema: &EntitySchema,
        arena: &mut SectionArena,
        section: &SectionName,
        path: &FieldPath,
    ) -> Result<Option<Self>, EngineError> {
        if !path.is_concrete() {
            return Err(formkeep_core::CoreError::InvalidPath {
                path: path.to_string(),
                reason: "bound fields need concrete indices".into(),
            }
            .into());
        }
        let Some(config) = resolve(&schema.attributes, &schema.methods, path).into_config() else {
            tracing::trace!(%path, "field not described, not rendered");
            return Ok(None);
        };
        if !config.can_read {
            return Ok(None);
        }
        arena.bind_field(section, config.clone())?;
        Ok(Some(Self {
            section: section.clone(),
            config,
        }))
    }

    pub fn section(&self) -> &SectionName {
        &self.section
    }

    pub fn path(&self) -> &FieldPath {
        &self.config.path
    }

    pub fn config(&self) -> &EffectiveFieldConfig {
        &self.config
    }

    pub fn can_write(&self) -> bool {
        self.config.can_write
    }

    pub fn value<'a>(&self, arena: &'a SectionArena) -> Result<Option<&'a FieldValue>, EngineError> {
        Ok(arena.section(&self.section)?.value_at(&self.config.path))
    }

    /// The error to style the field with, if it should be shown yet.
    pub fn error(&self, arena: &SectionArena) -> Result<Option<FieldError>, EngineError> {
        arena.visible_error(&self.section, &self.config.path)
    }

    pub fn set_value(&self, arena: &mut SectionArena, value: FieldValue) -> Result<WriteOutcome, EngineError> {
        if !self.config.can_write {
            return Ok(WriteOutcome::ReadOnly);
        }
        arena.write_field(&self.section, &self.config.path, value)
    }
}

/// Register the validator of every required, writable field `section`
/// holds, so its validity follows the schema before anything renders.
/// List wildcards expand over the items currently present; already bound
/// paths are left alone.
pub(crate) fn bind_required(
    schema: &EntitySchema,
    arena: &mut SectionArena,
    section: &SectionName,
) -> Result<(), EngineError> {
    let candidates: Vec<FieldPath> = {
        let current = arena.section(section)?;
        let Some(fields) = current.values().as_object() else {
            return Ok(());
        };
        schema
            .attributes
            .iter()
            .filter(|node| node.required)
            .filter(|node| node.path.root_key().is_some_and(|root| fields.contains_key(root)))
            .flat_map(|node| node.path.expand(current.values()))
            .filter(|path| !current.is_bound(path))
            .collect()
    };

    for path in &candidates {
        match resolve(&schema.attributes, &schema.methods, path).into_config() {
            Some(config) if config.can_write => arena.bind_field(section, config)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use formkeep_core::{Attributes, FieldKind, FieldSchemaNode, Methods, Verb};

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    fn schema(methods: Methods) -> EntitySchema {
        let attributes = Attributes::new()
            .with(FieldSchemaNode::new(path("id"), FieldKind::Number).read_only())
            .unwrap()
            .with(FieldSchemaNode::new(path("start_date"), FieldKind::Date).required())
            .unwrap();
        EntitySchema { attributes, methods }
    }

    fn arena() -> (SectionArena, SectionName) {
        let mut arena = SectionArena::new();
        let name = SectionName::new("basic");
        arena
            .register_section(
                name.clone(),
                FieldValue::object_from([
                    ("id", FieldValue::Integer(42)),
                    ("start_date", FieldValue::Null),
                ]),
            )
            .unwrap();
        (arena, name)
    }

    #[test]
    fn undescribed_fields_do_not_bind() {
        let (mut arena, basic) = arena();
        let binding = FieldBinding::bind(&schema(Methods::all()), &mut arena, &basic, &path("rent")).unwrap();
        assert!(binding.is_none());
    }

    #[test]
    fn unreadable_fields_do_not_bind() {
        let (mut arena, basic) = arena();
        let schema = schema(Methods::new([Verb::Patch]));
        let binding = FieldBinding::bind(&schema, &mut arena, &basic, &path("start_date")).unwrap();
        assert!(binding.is_none());
        // No validator was registered either.
        assert!(arena.section(&basic).unwrap().is_valid());
    }

    #[test]
    fn binding_registers_validator() {
        let (mut arena, basic) = arena();
        let binding = FieldBinding::bind(&schema(Methods::all()), &mut arena, &basic, &path("start_date"))
            .unwrap()
            .unwrap();
        assert!(!arena.section(&basic).unwrap().is_valid());
        assert_eq!(binding.error(&arena).unwrap(), None);

        binding.set_value(&mut arena, FieldValue::from("bogus")).unwrap();
        assert_eq!(binding.error(&arena).unwrap(), Some(FieldError::InvalidDate));

        binding.set_value(&mut arena, FieldValue::from("2024-03-01")).unwrap();
        assert_eq!(binding.error(&arena).unwrap(), None);
        assert_eq!(
            binding.value(&arena).unwrap(),
            Some(&FieldValue::from("2024-03-01"))
        );
    }

    #[test]
    fn read_only_binding_ignores_writes() {
        let (mut arena, basic) = arena();
        let binding = FieldBinding::bind(&schema(Methods::all()), &mut arena, &basic, &path("id"))
            .unwrap()
            .unwrap();
        assert!(!binding.can_write());
        let outcome = binding.set_value(&mut arena, FieldValue::Integer(7)).unwrap();
        assert_eq!(outcome, WriteOutcome::ReadOnly);
        assert_eq!(binding.value(&arena).unwrap(), Some(&FieldValue::Integer(42)));
        assert!(!arena.section(&basic).unwrap().is_dirty());
    }

    #[test]
    fn required_fields_bind_without_rendering() {
        let (mut arena, basic) = arena();
        let mut schema = schema(Methods::all());
        schema
            .attributes
            .insert(FieldSchemaNode::new(path("rent.amount"), FieldKind::Number).required())
            .unwrap();

        bind_required(&schema, &mut arena, &basic).unwrap();
        let section = arena.section(&basic).unwrap();
        assert!(section.is_bound(&path("start_date")));
        assert!(!section.is_bound(&path("id")));
        // `rent` is not part of this section.
        assert!(!section.is_bound(&path("rent.amount")));
        assert!(!section.is_valid());
        assert_eq!(section.errors()[&path("start_date")], FieldError::Required);
    }

    #[test]
    fn required_list_children_bind_per_item() {
        let mut attributes = Attributes::new();
        attributes
            .insert(FieldSchemaNode::new(path("tenants"), FieldKind::NestedList))
            .unwrap();
        attributes
            .insert(FieldSchemaNode::new(path("tenants[].name"), FieldKind::Text { max_length: None }).required())
            .unwrap();
        let schema = EntitySchema { attributes, methods: Methods::all() };

        let mut arena = SectionArena::new();
        let tenants = SectionName::new("tenants");
        let items = vec![
            FieldValue::object_from([("name", FieldValue::from("Aino"))]),
            FieldValue::object(),
        ];
        arena
            .register_section(tenants.clone(), FieldValue::object_from([("tenants", FieldValue::List(items))]))
            .unwrap();

        bind_required(&schema, &mut arena, &tenants).unwrap();
        let section = arena.section(&tenants).unwrap();
        assert!(section.is_bound(&path("tenants[0].name")));
        assert!(section.is_bound(&path("tenants[1].name")));
        assert_eq!(section.errors().len(), 1);
        assert_eq!(section.errors()[&path("tenants[1].name")], FieldError::Required);
    }

    #[test]
    fn wildcard_paths_cannot_bind() {
        let (mut arena, basic) = arena();
        assert!(FieldBinding::bind(&schema(Methods::all()), &mut arena, &basic, &path("tenants[]")).is_err());
    }
}
