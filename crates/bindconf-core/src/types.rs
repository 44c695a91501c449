//! Declared scalar types
//!
//! A store may carry a table from key path to [`ValueType`]. Coercion runs as
//! the last step of resolving a scalar at a declared path, on every `get`.

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::resolved::Resolved;

/// Table of declared types, keyed by dotted path
pub type TypeTable = IndexMap<String, ValueType>;

/// Target type of a declared coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Integer,
    Float,
    String,
}

impl ValueType {
    /// Name used in type tables and error messages
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Integer => "int",
            ValueType::Float => "float",
            ValueType::String => "str",
        }
    }

    /// Cast a resolved value to this type.
    ///
    /// Only scalars are coercible; anything else, or a scalar whose content
    /// does not fit, is a `TypeCoercion` error reported at `path`.
    pub fn coerce(&self, path: &str, value: Resolved) -> Result<Resolved> {
        let fail = |value: &Resolved| {
            Error::type_coercion(
                path,
                self.name(),
                format!("{} ({})", value.type_name(), value),
            )
        };

        match (self, value) {
            (ValueType::Bool, Resolved::Bool(b)) => Ok(Resolved::Bool(b)),
            (ValueType::Bool, Resolved::Integer(i)) if i == 0 || i == 1 => {
                Ok(Resolved::Bool(i == 1))
            }
            (ValueType::Bool, Resolved::String(s)) => {
                if s.eq_ignore_ascii_case("true") {
                    Ok(Resolved::Bool(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Ok(Resolved::Bool(false))
                } else {
                    Err(fail(&Resolved::String(s)))
                }
            }

            (ValueType::Integer, Resolved::Integer(i)) => Ok(Resolved::Integer(i)),
            (ValueType::Integer, Resolved::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Ok(Resolved::Integer(f as i64))
            }
            (ValueType::Integer, Resolved::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Resolved::Integer(i)),
                Err(_) => Err(fail(&Resolved::String(s))),
            },

            (ValueType::Float, Resolved::Float(f)) => Ok(Resolved::Float(f)),
            (ValueType::Float, Resolved::Integer(i)) => Ok(Resolved::Float(i as f64)),
            (ValueType::Float, Resolved::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Resolved::Float(f)),
                Err(_) => Err(fail(&Resolved::String(s))),
            },

            (ValueType::String, Resolved::String(s)) => Ok(Resolved::String(s)),
            (
                ValueType::String,
                v @ (Resolved::Bool(_) | Resolved::Integer(_) | Resolved::Float(_)),
            ) => Ok(Resolved::String(v.to_string())),

            (_, other) => Err(fail(&other)),
        }
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(ValueType::Bool),
            "int" => Ok(ValueType::Integer),
            "float" => Ok(ValueType::Float),
            "str" => Ok(ValueType::String),
            other => Err(Error::parse(format!("unknown type name '{}'", other))
                .with_help("Use one of: bool, int, float, str")),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a type table from `(path, type name)` pairs
pub fn parse_table<'a, I>(entries: I) -> Result<TypeTable>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    entries
        .into_iter()
        .map(|(path, name)| Ok((path.to_string(), name.parse()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::resolved::object;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_integer_coercion() {
        let t = ValueType::Integer;
        assert_eq!(t.coerce("p", Resolved::from("42")).unwrap(), Resolved::Integer(42));
        assert_eq!(t.coerce("p", Resolved::Float(3.0)).unwrap(), Resolved::Integer(3));
        assert_eq!(t.coerce("p", Resolved::Integer(7)).unwrap(), Resolved::Integer(7));

        let err = t.coerce("p", Resolved::Float(3.5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeCoercion);
        assert_eq!(err.path.as_deref(), Some("p"));
    }

    #[test]
    fn test_float_coercion() {
        let t = ValueType::Float;
        assert_eq!(t.coerce("p", Resolved::Integer(2)).unwrap(), Resolved::Float(2.0));
        assert_eq!(t.coerce("p", Resolved::from("0.5")).unwrap(), Resolved::Float(0.5));
        assert!(t.coerce("p", Resolved::from("half")).is_err());
    }

    #[test]
    fn test_bool_coercion() {
        let t = ValueType::Bool;
        assert_eq!(t.coerce("p", Resolved::from("TRUE")).unwrap(), Resolved::Bool(true));
        assert_eq!(t.coerce("p", Resolved::from("false")).unwrap(), Resolved::Bool(false));
        assert_eq!(t.coerce("p", Resolved::Integer(1)).unwrap(), Resolved::Bool(true));
        assert!(t.coerce("p", Resolved::from("yes please")).is_err());
        assert!(t.coerce("p", Resolved::Integer(2)).is_err());
    }

    #[test]
    fn test_string_coercion() {
        let t = ValueType::String;
        assert_eq!(t.coerce("p", Resolved::Integer(5)).unwrap(), Resolved::from("5"));
        assert_eq!(t.coerce("p", Resolved::Bool(true)).unwrap(), Resolved::from("true"));
    }

    #[test]
    fn test_non_scalars_rejected() {
        let err = ValueType::String
            .coerce("enc", Resolved::Object(object(1_u8)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeCoercion);
        assert!(ValueType::Integer.coerce("p", Resolved::Null).is_err());
        assert!(ValueType::Integer
            .coerce("p", Resolved::Sequence(vec![Resolved::Integer(1)]))
            .is_err());
    }

    #[test]
    fn test_parse_table() {
        let table = parse_table([("a.b", "int"), ("c", "str")]).unwrap();
        assert_eq!(table.get("a.b"), Some(&ValueType::Integer));
        assert_eq!(table.get("c"), Some(&ValueType::String));

        let err = parse_table([("a", "decimal")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }
}
