//! Resolved configuration values
//!
//! Unlike [`Value`], a resolved value can hold things that only exist at
//! runtime: objects built by construction references and callables named
//! by unbound references. Objects are shared by reference, so two
//! resolutions of the same singleton compare equal by identity.

use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::value::Value;

/// A constructed object, shared by reference
pub type Object = Arc<dyn Any + Send + Sync>;

/// Zero-argument constructor behind an `@name()` reference
pub type Factory = Arc<dyn Fn() -> Result<Object> + Send + Sync>;

/// Wrap a value as a shareable [`Object`]
pub fn object<T: Any + Send + Sync>(value: T) -> Object {
    Arc::new(value)
}

/// A named factory handed out by an unbound `@name` reference
#[derive(Clone)]
pub struct Callable {
    name: String,
    factory: Factory,
}

impl Callable {
    /// Create a callable from a name and a factory
    pub fn new(name: impl Into<String>, factory: Factory) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    /// The dotted name this callable was resolved from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the factory
    pub fn call(&self) -> Result<Object> {
        (self.factory)()
    }

    /// The underlying factory
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Whether both callables share the same factory
    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.factory, &other.factory)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}

/// A fully resolved configuration value
#[derive(Clone, Default)]
pub enum Resolved {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Sequence of resolved values
    Sequence(Vec<Resolved>),
    /// Mapping of string keys to resolved values
    Mapping(IndexMap<String, Resolved>),
    /// Object built by a construction reference, or exported as-is
    Object(Object),
    /// Callable designated by an unbound reference
    Callable(Callable),
}

impl Resolved {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Resolved::Null)
    }

    /// Get as boolean if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Resolved::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Resolved::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float or Integer
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Resolved::Float(f) => Some(*f),
            Resolved::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Resolved::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as slice if this is a Sequence
    pub fn as_sequence(&self) -> Option<&[Resolved]> {
        match self {
            Resolved::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Resolved>> {
        match self {
            Resolved::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Get the shared object if this is an Object
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Resolved::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Downcast an Object to a concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Resolved::Object(o) => Arc::clone(o).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Get the callable if this is a Callable
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Resolved::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Resolved::Null => "null",
            Resolved::Bool(_) => "boolean",
            Resolved::Integer(_) => "integer",
            Resolved::Float(_) => "float",
            Resolved::String(_) => "string",
            Resolved::Sequence(_) => "sequence",
            Resolved::Mapping(_) => "mapping",
            Resolved::Object(_) => "object",
            Resolved::Callable(_) => "callable",
        }
    }

    /// Convert back to a plain [`Value`], if nothing runtime-only is inside
    pub fn to_value(&self) -> Option<Value> {
        Some(match self {
            Resolved::Null => Value::Null,
            Resolved::Bool(b) => Value::Bool(*b),
            Resolved::Integer(i) => Value::Integer(*i),
            Resolved::Float(f) => Value::Float(*f),
            Resolved::String(s) => Value::String(s.clone()),
            Resolved::Sequence(seq) => {
                Value::Sequence(seq.iter().map(Resolved::to_value).collect::<Option<_>>()?)
            }
            Resolved::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| v.to_value().map(|v| (k.clone(), v)))
                    .collect::<Option<_>>()?,
            ),
            Resolved::Object(_) | Resolved::Callable(_) => return None,
        })
    }

    /// Convert to a plain [`Value`], rendering runtime-only values as text
    pub fn to_value_lossy(&self) -> Value {
        match self {
            Resolved::Sequence(seq) => {
                Value::Sequence(seq.iter().map(Resolved::to_value_lossy).collect())
            }
            Resolved::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value_lossy()))
                    .collect(),
            ),
            Resolved::Object(_) | Resolved::Callable(_) => Value::String(self.to_string()),
            other => other.to_value().unwrap_or_default(),
        }
    }
}

impl PartialEq for Resolved {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Resolved::Null, Resolved::Null) => true,
            (Resolved::Bool(a), Resolved::Bool(b)) => a == b,
            (Resolved::Integer(a), Resolved::Integer(b)) => a == b,
            (Resolved::Float(a), Resolved::Float(b)) => a == b,
            (Resolved::String(a), Resolved::String(b)) => a == b,
            (Resolved::Sequence(a), Resolved::Sequence(b)) => a == b,
            (Resolved::Mapping(a), Resolved::Mapping(b)) => a == b,
            (Resolved::Object(a), Resolved::Object(b)) => Arc::ptr_eq(a, b),
            (Resolved::Callable(a), Resolved::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Null => write!(f, "Null"),
            Resolved::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Resolved::Integer(i) => f.debug_tuple("Integer").field(i).finish(),
            Resolved::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Resolved::String(s) => f.debug_tuple("String").field(s).finish(),
            Resolved::Sequence(seq) => f.debug_tuple("Sequence").field(seq).finish(),
            Resolved::Mapping(map) => f.debug_tuple("Mapping").field(map).finish(),
            Resolved::Object(o) => write!(f, "Object({:p})", Arc::as_ptr(o)),
            Resolved::Callable(c) => f.debug_tuple("Callable").field(&c.name).finish(),
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Object(o) => write!(f, "<object {:p}>", Arc::as_ptr(o)),
            Resolved::Callable(c) => write!(f, "<callable @{}>", c.name),
            Resolved::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Resolved::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            other => match other.to_value() {
                Some(v) => write!(f, "{}", v),
                None => Ok(()),
            },
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Resolved::Null,
            Value::Bool(b) => Resolved::Bool(b),
            Value::Integer(i) => Resolved::Integer(i),
            Value::Float(f) => Resolved::Float(f),
            Value::String(s) => Resolved::String(s),
            Value::Sequence(seq) => Resolved::Sequence(seq.into_iter().map(Into::into).collect()),
            Value::Mapping(map) => {
                Resolved::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for Resolved {
    fn from(b: bool) -> Self {
        Resolved::Bool(b)
    }
}

impl From<i64> for Resolved {
    fn from(i: i64) -> Self {
        Resolved::Integer(i)
    }
}

impl From<i32> for Resolved {
    fn from(i: i32) -> Self {
        Resolved::Integer(i as i64)
    }
}

impl From<f64> for Resolved {
    fn from(f: f64) -> Self {
        Resolved::Float(f)
    }
}

impl From<String> for Resolved {
    fn from(s: String) -> Self {
        Resolved::String(s)
    }
}

impl From<&str> for Resolved {
    fn from(s: &str) -> Self {
        Resolved::String(s.to_string())
    }
}

impl From<Object> for Resolved {
    fn from(o: Object) -> Self {
        Resolved::Object(o)
    }
}

impl From<Callable> for Resolved {
    fn from(c: Callable) -> Self {
        Resolved::Callable(c)
    }
}
