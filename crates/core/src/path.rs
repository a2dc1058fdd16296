use std::fmt;

use crate::error::CoreError;
use crate::field_value::FieldValue;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    /// A concrete list element, `tenants[2]`.
    Index(usize),
    /// The schema wildcard, `tenants[]`: "each element".
    Each,
}

/// A parsed dot/bracket field path such as `tenants[].tenant.contact`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(invalid("empty segment"));
            }
            segments.push(Segment::Key(name.to_string()));

            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| invalid("unterminated bracket"))?;
                if !rest.starts_with('[') {
                    return Err(invalid("unexpected text after bracket"));
                }
                let inner = &rest[1..close];
                if inner.is_empty() {
                    segments.push(Segment::Each);
                } else {
                    let index = inner
                        .parse::<usize>()
                        .map_err(|_| invalid("list index is not a number"))?;
                    segments.push(Segment::Index(index));
                }
                rest = &rest[close + 1..];
            }
        }

        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// A single-segment path naming a top-level field.
    pub fn key(name: &str) -> Self {
        Self {
            segments: vec![Segment::Key(name.to_string())],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The path used to look up schema nodes: every index becomes `[]`.
    pub fn schema_key(&self) -> FieldPath {
        FieldPath {
            segments: self
                .segments
                .iter()
                .map(|s| match s {
                    Segment::Index(_) => Segment::Each,
                    other => other.clone(),
                })
                .collect(),
        }
    }

    pub fn is_concrete(&self) -> bool {
        !self.segments.iter().any(|s| matches!(s, Segment::Each))
    }

    /// The first key of the path: the top-level field it lives under.
    pub fn root_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// The enclosing path; `None` for the empty path.
    pub fn parent(&self) -> Option<FieldPath> {
        let (_, rest) = self.segments.split_last()?;
        Some(FieldPath {
            segments: rest.to_vec(),
        })
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Every concrete path this path names within `root`. `[]` expands over
    /// the list items present; keys expand whether or not they exist yet.
    pub fn expand(&self, root: &FieldValue) -> Vec<FieldPath> {
        let mut found: Vec<(Vec<Segment>, Option<&FieldValue>)> = vec![(Vec::new(), Some(root))];
        for segment in &self.segments {
            let mut next = Vec::new();
            for (prefix, value) in found {
                match segment {
                    Segment::Each => {
                        if let Some(FieldValue::List(items)) = value {
                            for (i, item) in items.iter().enumerate() {
                                let mut segments = prefix.clone();
                                segments.push(Segment::Index(i));
                                next.push((segments, Some(item)));
                            }
                        }
                    }
                    Segment::Key(k) => {
                        let child = match value {
                            Some(FieldValue::Object(map)) => map.get(k),
                            _ => None,
                        };
                        let mut segments = prefix;
                        segments.push(segment.clone());
                        next.push((segments, child));
                    }
                    Segment::Index(i) => {
                        let child = match value {
                            Some(FieldValue::List(items)) => items.get(*i),
                            _ => None,
                        };
                        let mut segments = prefix;
                        segments.push(segment.clone());
                        next.push((segments, child));
                    }
                }
            }
            found = next;
        }
        found
            .into_iter()
            .map(|(segments, _)| FieldPath { segments })
            .collect()
    }

    pub fn child(&self, key: &str) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        FieldPath { segments }
    }

    pub fn index(&self, i: usize) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(i));
        FieldPath { segments }
    }

    pub fn each(&self) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Each);
        FieldPath { segments }
    }

    pub fn get<'a>(&self, root: &'a FieldValue) -> Option<&'a FieldValue> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(k), FieldValue::Object(map)) => map.get(k)?,
                (Segment::Index(i), FieldValue::List(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at this path, creating intermediate objects as needed.
    /// An index may name an existing element or append exactly one.
    pub fn set(&self, root: &mut FieldValue, value: FieldValue) -> Result<(), CoreError> {
        let conflict = |reason: &str| CoreError::PathConflict {
            path: self.to_string(),
            reason: reason.to_string(),
        };

        let mut current = root;
        for segment in &self.segments {
            if current.is_null() {
                *current = match segment {
                    Segment::Key(_) => FieldValue::object(),
                    _ => FieldValue::List(Vec::new()),
                };
            }
            current = match (segment, current) {
                (Segment::Key(k), FieldValue::Object(map)) => {
                    map.entry(k.clone()).or_insert(FieldValue::Null)
                }
                (Segment::Index(i), FieldValue::List(items)) => {
                    // Lists grow by one element at a time.
                    if *i == items.len() {
                        items.push(FieldValue::Null);
                    }
                    match items.get_mut(*i) {
                        Some(item) => item,
                        None => return Err(conflict("index beyond end of list")),
                    }
                }
                (Segment::Each, _) => return Err(conflict("wildcard paths are not writable")),
                (Segment::Key(_), _) => return Err(conflict("parent is not an object")),
                (Segment::Index(_), _) => return Err(conflict("parent is not a list")),
            };
        }
        *current = value;
        Ok(())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => write!(f, "{k}")?,
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
                Segment::Each => write!(f, "[]")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}
