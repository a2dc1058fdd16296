use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// The permission map for one entity type: the set of allowed verbs.
/// A verb that is not listed is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Methods {
    allowed: BTreeSet<Verb>,
}

impl Methods {
    pub fn new(allowed: impl IntoIterator<Item = Verb>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn all() -> Self {
        Self::new([Verb::Get, Verb::Post, Verb::Patch, Verb::Delete])
    }

    pub fn read_only() -> Self {
        Self::new([Verb::Get])
    }

    pub fn allows(&self, verb: Verb) -> bool {
        self.allowed.contains(&verb)
    }

    pub fn set(&mut self, verb: Verb, allowed: bool) {
        if allowed {
            self.allowed.insert(verb);
        } else {
            self.allowed.remove(&verb);
        }
    }

    /// Parse the backend's `{"GET": true, "PATCH": false, ...}` map.
    /// Unknown verbs (HEAD, OPTIONS, PUT) are ignored.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData("methods must be a JSON object".into()))?;
        let mut methods = Methods::default();
        for (name, flag) in map {
            let Some(verb) = Verb::parse(name) else {
                continue;
            };
            let allowed = flag.as_bool().ok_or_else(|| {
                CoreError::InvalidData(format!("method {name} must map to a boolean"))
            })?;
            methods.set(verb, allowed);
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_map() {
        let json = serde_json::json!({"GET": true, "POST": false, "PATCH": true, "DELETE": false, "HEAD": true});
        let methods = Methods::from_json(&json).unwrap();
        assert!(methods.allows(Verb::Get));
        assert!(methods.allows(Verb::Patch));
        assert!(!methods.allows(Verb::Post));
        assert!(!methods.allows(Verb::Delete));
    }

    #[test]
    fn absent_verbs_are_denied() {
        let methods = Methods::from_json(&serde_json::json!({"GET": true})).unwrap();
        assert!(!methods.allows(Verb::Patch));
    }

    #[test]
    fn rejects_non_boolean_flags() {
        assert!(Methods::from_json(&serde_json::json!({"GET": "yes"})).is_err());
        assert!(Methods::from_json(&serde_json::json!([])).is_err());
    }
}
