//! Marker string classification
//!
//! A raw string value is classified exactly once into one of:
//! - `${path.to.value}` - interpolation of another key
//! - `@dotted.name` - unbound reference to an external callable or value
//! - `@dotted.name()` - construction reference (singleton per key)
//! - `\${escaped}` - literal text starting with `${`
//! - anything else - literal text
//!
//! Sibling keys of the form `K/param` carry scope overrides for the
//! construction at `K`; see [`scope_param`].

/// Separator between a construction key and a scope override parameter
pub const SCOPE_SEPARATOR: char = '/';

/// The meaning of a raw string value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker<'a> {
    /// Plain text, returned as-is
    Literal(&'a str),
    /// `\${...}` with the backslash removed
    Escaped(&'a str),
    /// `${path}`: resolves to the fully-resolved value at `path`
    Interpolation(&'a str),
    /// `@name`: resolves to whatever `name` designates, without invoking it
    UnboundReference(&'a str),
    /// `@name()`: invokes `name` once per key and caches the result
    ConstructionReference(&'a str),
}

/// Classify a raw string value
pub fn classify(s: &str) -> Marker<'_> {
    if let Some(rest) = s.strip_prefix('\\') {
        if rest.starts_with("${") {
            return Marker::Escaped(rest);
        }
    }

    if let Some(inner) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        let inner = inner.trim();
        if is_key_path(inner) {
            return Marker::Interpolation(inner);
        }
        return Marker::Literal(s);
    }

    if let Some(name) = s.strip_prefix('@') {
        if let Some(callee) = name.strip_suffix("()") {
            if is_dotted_name(callee) {
                return Marker::ConstructionReference(callee);
            }
        } else if is_dotted_name(name) {
            return Marker::UnboundReference(name);
        }
    }

    Marker::Literal(s)
}

/// Split a scope override key `K/param` into `(K, param)`
pub fn scope_param(key: &str) -> Option<(&str, &str)> {
    let (owner, param) = key.split_once(SCOPE_SEPARATOR)?;
    if owner.is_empty() || param.is_empty() {
        return None;
    }
    Some((owner, param))
}

/// Dotted external name: identifier segments separated by `.`
fn is_dotted_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
}

/// Key path inside `${...}`: non-empty segments without braces or whitespace
fn is_key_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && !segment
                    .chars()
                    .any(|c| c.is_whitespace() || c == '{' || c == '}' || c == '$')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert_eq!(classify("hello"), Marker::Literal("hello"));
        assert_eq!(classify(""), Marker::Literal(""));
        assert_eq!(classify("user@example.com"), Marker::Literal("user@example.com"));
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(classify("${k1}"), Marker::Interpolation("k1"));
        assert_eq!(classify("${ a.b.c }"), Marker::Interpolation("a.b.c"));
        assert_eq!(classify("${encoder/num}"), Marker::Interpolation("encoder/num"));
    }

    #[test]
    fn test_partial_interpolation_is_literal() {
        assert_eq!(classify("prefix-${k1}"), Marker::Literal("prefix-${k1}"));
        assert_eq!(classify("${k1}-suffix"), Marker::Literal("${k1}-suffix"));
        assert_eq!(classify("${}"), Marker::Literal("${}"));
        assert_eq!(classify("${a}${b}"), Marker::Literal("${a}${b}"));
    }

    #[test]
    fn test_escaped() {
        assert_eq!(classify("\\${not_resolved}"), Marker::Escaped("${not_resolved}"));
        assert_eq!(classify("\\plain"), Marker::Literal("\\plain"));
    }

    #[test]
    fn test_references() {
        assert_eq!(
            classify("@models.encoders.make"),
            Marker::UnboundReference("models.encoders.make")
        );
        assert_eq!(
            classify("@models.encoders.make()"),
            Marker::ConstructionReference("models.encoders.make")
        );
        assert_eq!(classify("@make_1()"), Marker::ConstructionReference("make_1"));
    }

    #[test]
    fn test_invalid_reference_is_literal() {
        assert_eq!(classify("@"), Marker::Literal("@"));
        assert_eq!(classify("@()"), Marker::Literal("@()"));
        assert_eq!(classify("@a b"), Marker::Literal("@a b"));
        assert_eq!(classify("@a..b"), Marker::Literal("@a..b"));
        assert_eq!(classify("@1abc"), Marker::Literal("@1abc"));
        assert_eq!(classify("@make(4)"), Marker::Literal("@make(4)"));
    }

    #[test]
    fn test_scope_param() {
        assert_eq!(scope_param("encoder/num"), Some(("encoder", "num")));
        assert_eq!(scope_param("encoder"), None);
        assert_eq!(scope_param("/num"), None);
        assert_eq!(scope_param("encoder/"), None);
    }
}
