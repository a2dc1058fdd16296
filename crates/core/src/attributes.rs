use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::path::FieldPath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: FieldValue,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<FieldValue>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// The data type of a field, with the metadata that only makes sense for
/// that type carried inside the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text { max_length: Option<usize> },
    Number,
    Decimal { decimal_places: Option<u32> },
    Date,
    Choice(Vec<Choice>),
    MultiChoice(Vec<Choice>),
    Boolean,
    NestedObject,
    NestedList,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Number => "number",
            Self::Decimal { .. } => "decimal",
            Self::Date => "date",
            Self::Choice(_) => "choice",
            Self::MultiChoice(_) => "multi-choice",
            Self::Boolean => "boolean",
            Self::NestedObject => "nested-object",
            Self::NestedList => "nested-list",
        }
    }

    pub fn choices(&self) -> &[Choice] {
        match self {
            Self::Choice(c) | Self::MultiChoice(c) => c,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchemaNode {
    pub path: FieldPath,
    pub kind: FieldKind,
    pub required: bool,
    pub read_only: bool,
    pub label: String,
}

impl FieldSchemaNode {
    pub fn new(path: FieldPath, kind: FieldKind) -> Self {
        let label = path.to_string();
        Self {
            path,
            kind,
            required: false,
            read_only: false,
            label,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// The field schema tree for one entity type, keyed by schema path
/// (list elements addressed with the `[]` wildcard).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    nodes: BTreeMap<FieldPath, FieldSchemaNode>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: FieldSchemaNode) -> Result<(), CoreError> {
        let key = node.path.schema_key();
        if self.nodes.contains_key(&key) {
            return Err(CoreError::DuplicatePath(key.to_string()));
        }
        self.nodes.insert(key, node);
        Ok(())
    }

    pub fn with(mut self, node: FieldSchemaNode) -> Result<Self, CoreError> {
        self.insert(node)?;
        Ok(self)
    }

    /// Look up the node describing `path`. Concrete list indices are matched
    /// against the wildcard form.
    pub fn get(&self, path: &FieldPath) -> Option<&FieldSchemaNode> {
        self.nodes.get(&path.schema_key())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSchemaNode> {
        self.nodes.values()
    }

    /// Parse the backend's nested field metadata.
    ///
    /// Every top-level key is a field name mapping to an object with `type`,
    /// `required`, `read_only`, `label` and optional `max_length`,
    /// `decimal_places` and `choices`. Nested objects carry `children`; lists
    /// carry `child`, which describes each element and lands at `name[]`.
    pub fn from_json(value: &Json) -> Result<Self, CoreError> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData("attributes must be a JSON object".into()))?;
        let mut attributes = Attributes::new();
        for (name, meta) in map {
            let path = FieldPath::key(name);
            collect_node(&mut attributes, path, meta)?;
        }
        Ok(attributes)
    }
}

fn collect_node(out: &mut Attributes, path: FieldPath, meta: &Json) -> Result<(), CoreError> {
    let obj = meta
        .as_object()
        .ok_or_else(|| CoreError::InvalidData(format!("metadata for {path} is not an object")))?;

    let flag = |key: &str| obj.get(key).and_then(Json::as_bool).unwrap_or(false);
    let type_name = obj.get("type").and_then(Json::as_str).unwrap_or("string");
    let choices = parse_choices(obj.get("choices"))?;

    let kind = if let Some(child) = obj.get("child") {
        collect_node(out, path.each(), child)?;
        FieldKind::NestedList
    } else if let Some(children) = obj.get("children") {
        collect_children(out, &path, children)?;
        FieldKind::NestedObject
    } else {
        kind_for(type_name, obj, choices)
    };

    let label = obj
        .get("label")
        .and_then(Json::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string());

    out.insert(FieldSchemaNode {
        path,
        kind,
        required: flag("required"),
        read_only: flag("read_only"),
        label,
    })
}

fn collect_children(out: &mut Attributes, parent: &FieldPath, children: &Json) -> Result<(), CoreError> {
    let map = children
        .as_object()
        .ok_or_else(|| CoreError::InvalidData(format!("children of {parent} is not an object")))?;
    for (name, meta) in map {
        collect_node(out, parent.child(name), meta)?;
    }
    Ok(())
}

fn kind_for(type_name: &str, obj: &serde_json::Map<String, Json>, choices: Vec<Choice>) -> FieldKind {
    match type_name {
        "integer" => FieldKind::Number,
        "decimal" | "float" => FieldKind::Decimal {
            decimal_places: obj
                .get("decimal_places")
                .and_then(Json::as_u64)
                .map(|n| n as u32),
        },
        "date" => FieldKind::Date,
        "boolean" => FieldKind::Boolean,
        "multiple choice" => FieldKind::MultiChoice(choices),
        "nested object" => FieldKind::NestedObject,
        "list" | "nested list" => FieldKind::NestedList,
        "choice" => FieldKind::Choice(choices),
        _ if !choices.is_empty() => FieldKind::Choice(choices),
        _ => FieldKind::Text {
            max_length: obj
                .get("max_length")
                .and_then(Json::as_u64)
                .map(|n| n as usize),
        },
    }
}

fn parse_choices(raw: Option<&Json>) -> Result<Vec<Choice>, CoreError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let items = raw
        .as_array()
        .ok_or_else(|| CoreError::InvalidData("choices must be an array".into()))?;
    items
        .iter()
        .map(|item| {
            let value = item
                .get("value")
                .ok_or_else(|| CoreError::InvalidData("choice without value".into()))?;
            let label = item
                .get("display_name")
                .and_then(Json::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            Ok(Choice {
                value: FieldValue::from_json(value),
                label,
            })
        })
        .collect()
}
