//! External object resolution
//!
//! `@name` and `@name()` markers name things outside the configuration tree.
//! The engine never loads code itself; it asks an [`ObjectResolver`] to turn
//! a dotted name into an [`Export`]. [`Registry`] is the standard
//! table-backed implementation, and a process-wide registry is available for
//! host code that registers its factories at startup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::resolved::{Callable, Factory, Object, Resolved};
use crate::value::Value;

/// Something a dotted name can designate
#[derive(Clone)]
pub enum Export {
    /// Zero-argument constructor; `@name()` invokes it
    Factory(Factory),
    /// An existing object, returned as-is by `@name`
    Object(Object),
    /// A plain value, returned as-is by `@name`
    Value(Value),
}

impl Export {
    /// Create a factory export from a closure
    pub fn factory<F>(func: F) -> Self
    where
        F: Fn() -> Result<Object> + Send + Sync + 'static,
    {
        Export::Factory(Arc::new(func))
    }

    /// The value an unbound `@name` reference resolves to
    pub fn into_resolved(self, name: &str) -> Resolved {
        match self {
            Export::Factory(factory) => Resolved::Callable(Callable::new(name, factory)),
            Export::Object(object) => Resolved::Object(object),
            Export::Value(value) => Resolved::from(value),
        }
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Export::Factory(_) => write!(f, "Factory"),
            Export::Object(_) => write!(f, "Object"),
            Export::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// Trait for resolving dotted external names
pub trait ObjectResolver: Send + Sync {
    /// Resolve `name` (without the leading `@`) to what it designates.
    ///
    /// Fails with `ReferenceResolution` if the name is unknown.
    fn resolve(&self, name: &str) -> Result<Export>;
}

// Global registry for host code
static GLOBAL_REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

/// Get the global object registry.
///
/// Stores created without an explicit resolver look names up here.
pub fn global_registry() -> &'static RwLock<Registry> {
    GLOBAL_REGISTRY.get_or_init(|| RwLock::new(Registry::new()))
}

/// Register an export in the global registry.
///
/// # Arguments
/// * `name` - Dotted name the export is reachable under
/// * `export` - What the name designates
/// * `force` - If true, overwrite an existing export with the same name.
///   If false, return an error if the name is already registered.
pub fn register_global(name: impl Into<String>, export: Export, force: bool) -> Result<()> {
    let mut registry = global_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    registry.register_with_force(name, export, force)
}

/// Registry of named exports
#[derive(Clone, Default)]
pub struct Registry {
    exports: HashMap<String, Export>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an export, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, export: Export) {
        self.exports.insert(name.into(), export);
    }

    /// Register an export with optional force overwrite
    pub fn register_with_force(
        &mut self,
        name: impl Into<String>,
        export: Export,
        force: bool,
    ) -> Result<()> {
        let name = name.into();
        if !force && self.exports.contains_key(&name) {
            return Err(Error::reference(&name, "name is already registered")
                .with_help("Pass force=true to replace the existing export"));
        }
        log::debug!("Registered export '{}'", name);
        self.exports.insert(name, export);
        Ok(())
    }

    /// Register a zero-argument constructor
    pub fn register_factory<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn() -> Result<Object> + Send + Sync + 'static,
    {
        self.register(name, Export::factory(func));
    }

    /// Register a plain value
    pub fn register_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.register(name, Export::Value(value.into()));
    }

    /// Check if a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }
}

impl ObjectResolver for Registry {
    fn resolve(&self, name: &str) -> Result<Export> {
        self.exports
            .get(name)
            .cloned()
            .ok_or_else(|| Error::reference(name, "name is not registered"))
    }
}

/// Resolver that consults the global registry at lookup time
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalResolver;

impl ObjectResolver for GlobalResolver {
    fn resolve(&self, name: &str) -> Result<Export> {
        global_registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::resolved::object;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = Registry::new();
        registry.register_factory("mod.make", || Ok(object(7_i64)));
        registry.register_value("mod.answer", 42);

        assert!(registry.contains("mod.make"));
        match registry.resolve("mod.make").unwrap() {
            Export::Factory(f) => assert_eq!(*f().unwrap().downcast::<i64>().unwrap(), 7),
            other => panic!("expected factory, got {:?}", other),
        }
        assert_eq!(
            registry.resolve("mod.answer").unwrap().into_resolved("mod.answer"),
            Resolved::Integer(42)
        );
    }

    #[test]
    fn test_unknown_name() {
        let registry = Registry::new();
        let err = registry.resolve("nope.missing").unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::ReferenceResolution {
                name: "nope.missing".into()
            }
        );
    }

    #[test]
    fn test_register_with_force() {
        let mut registry = Registry::new();
        registry.register_value("a", 1);

        assert!(registry
            .register_with_force("a", Export::Value(Value::Integer(2)), false)
            .is_err());
        registry
            .register_with_force("a", Export::Value(Value::Integer(2)), true)
            .unwrap();
        assert_eq!(registry.resolve("a").unwrap().into_resolved("a"), Resolved::Integer(2));
    }

    #[test]
    fn test_factory_export_resolves_to_callable() {
        let export = Export::factory(|| Ok(object("built")));
        let resolved = export.into_resolved("mod.build");

        let callable = resolved.as_callable().unwrap();
        assert_eq!(callable.name(), "mod.build");
        assert_eq!(*callable.call().unwrap().downcast::<&str>().unwrap(), "built");
    }

    #[test]
    fn test_global_resolver() {
        register_global(
            "registry_tests.global_value",
            Export::Value(Value::from("hello")),
            true,
        )
        .unwrap();

        let resolved = GlobalResolver
            .resolve("registry_tests.global_value")
            .unwrap()
            .into_resolved("registry_tests.global_value");
        assert_eq!(resolved, Resolved::from("hello"));
    }
}
