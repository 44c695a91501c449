//! Raw configuration values
//!
//! The layered tree as loaded, before any marker is resolved. Marker strings
//! such as `${path}` or `@name()` and scope override keys like `encoder/num`
//! are stored verbatim here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A configuration value that may contain unresolved marker strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value (may be a marker like ${path} or @name())
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// An empty mapping, the root of every store
    pub fn empty_mapping() -> Self {
        Value::Mapping(IndexMap::new())
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a mapping
    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a dotted key path.
    ///
    /// Returns `Ok(None)` when a segment is absent and `InvalidPath` when an
    /// intermediate segment exists but is not a mapping.
    pub fn lookup(&self, path: &str) -> Result<Option<&Value>> {
        let segments = split_path(path)?;
        let mut current = self;

        for (i, segment) in segments.iter().enumerate() {
            match current {
                Value::Mapping(map) => match map.get(*segment) {
                    Some(next) => current = next,
                    None => return Ok(None),
                },
                other => {
                    return Err(Error::invalid_path(
                        path,
                        format!(
                            "'{}' is a {}, not a mapping",
                            segments[..i].join("."),
                            other.type_name()
                        ),
                    ))
                }
            }
        }

        Ok(Some(current))
    }

    /// Look up a dotted key path together with the mapping that holds it
    pub fn lookup_with_parent(
        &self,
        path: &str,
    ) -> Result<Option<(&IndexMap<String, Value>, &Value)>> {
        split_path(path)?;
        let (parent_path, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (Some(parent), key),
            None => (None, path),
        };
        let parent = match parent_path {
            Some(p) => match self.lookup(p).map_err(|e| e.with_path(path))? {
                Some(v) => v,
                None => return Ok(None),
            },
            None => self,
        };
        match parent {
            Value::Mapping(map) => Ok(map.get(key).map(|leaf| (map, leaf))),
            other => Err(Error::invalid_path(
                path,
                format!(
                    "'{}' is a {}, not a mapping",
                    parent_path.unwrap_or_default(),
                    other.type_name()
                ),
            )),
        }
    }

    /// Set a value at a path, creating intermediate mappings as needed
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        let (last, intermediate) = match segments.split_last() {
            Some(split) => split,
            None => return Err(Error::invalid_path(path, "empty key path")),
        };

        let mut current = self;
        for segment in intermediate {
            current = match current {
                Value::Mapping(map) => map
                    .entry((*segment).to_string())
                    .or_insert_with(Value::empty_mapping),
                other => {
                    return Err(Error::invalid_path(
                        path,
                        format!("cannot descend into a {}", other.type_name()),
                    ))
                }
            };
        }

        match current {
            Value::Mapping(map) => {
                map.insert((*last).to_string(), value);
                Ok(())
            }
            other => Err(Error::invalid_path(
                path,
                format!("cannot set a key inside a {}", other.type_name()),
            )),
        }
    }

    /// Remove the value at a path, returning it if present
    pub fn remove_path(&mut self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        let (last, intermediate) = match segments.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };

        let mut current = self;
        for segment in intermediate {
            current = match current {
                Value::Mapping(map) => match map.get_mut(*segment) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }

        match current {
            Value::Mapping(map) => Ok(map.shift_remove(*last)),
            _ => Ok(None),
        }
    }

    /// Copy of this tree with the given dotted keys removed.
    ///
    /// Keys that do not exist are ignored; `self` is left untouched.
    pub fn stripped<S: AsRef<str>>(&self, except_keys: &[S]) -> Result<Value> {
        let mut copy = self.clone();
        for key in except_keys {
            copy.remove_path(key.as_ref())?;
        }
        Ok(copy)
    }

    /// Collect the dotted paths of every non-mapping leaf
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_leaf_paths("", &mut paths);
        paths
    }

    fn collect_leaf_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            Value::Mapping(map) => {
                for (key, value) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    value.collect_leaf_paths(&path, out);
                }
            }
            _ if !prefix.is_empty() => out.push(prefix.to_string()),
            _ => {}
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Deep-merge a later layer into this one.
    ///
    /// Only mapping into mapping recurses; in every other pairing the later
    /// layer replaces the node, sequences included.
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, overlay_value) in overlay {
                    if let Some(base_value) = base.get_mut(&key) {
                        base_value.merge(overlay_value);
                    } else {
                        base.insert(key, overlay_value);
                    }
                }
            }
            (this, other) => {
                *this = other;
            }
        }
    }

    /// Create a merged value from two values (non-mutating)
    pub fn merged(mut self, other: Value) -> Value {
        self.merge(other);
        self
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

/// Split a dotted key path into its segments.
///
/// Every segment must be non-empty.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(Error::invalid_path(path, "empty key path"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::invalid_path(path, "key path contains an empty segment"));
    }
    Ok(segments)
}

/// Last segment of a dotted key path
pub fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Join a parent key path and a child key
pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}
