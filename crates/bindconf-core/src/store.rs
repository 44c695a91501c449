//! The configuration store
//!
//! A [`Store`] owns one raw tree, one singleton cache and one scope stack.
//! Every `get` resolves from the raw tree: interpolations are followed,
//! references are handed to the [`ObjectResolver`], construction references
//! are built once per key and cached, and declared types are applied last.

use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::loader;
use crate::marker::{classify, scope_param, Marker, SCOPE_SEPARATOR};
use crate::registry::{Export, GlobalResolver, ObjectResolver};
use crate::resolved::{Object, Resolved};
use crate::scope::{Frame, InProgress, ScopeStack};
use crate::types::TypeTable;
use crate::value::{join_path, last_segment, split_path, Value};

/// Options for building a store
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Declared scalar types, applied on every `get`
    pub types: TypeTable,
    /// Resolver for `@name` markers; the global registry when `None`
    pub resolver: Option<Arc<dyn ObjectResolver>>,
    /// Names of the patch layers the tree was built from
    pub conf_patches: Vec<String>,
}

impl StoreOptions {
    /// Set the declared types table
    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    /// Set the object resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ObjectResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("types", &self.types)
            .field("resolver", &self.resolver.as_ref().map(|_| "custom"))
            .field("conf_patches", &self.conf_patches)
            .finish()
    }
}

struct Inner {
    raw: RwLock<Value>,
    singletons: Mutex<HashMap<String, Object>>,
    scopes: ScopeStack,
    resolving: InProgress,
    constructing: InProgress,
    types: TypeTable,
    resolver: Arc<dyn ObjectResolver>,
    conf_patches: Vec<String>,
}

/// A resolvable configuration store
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create a store over a raw tree
    pub fn new(raw: Value) -> Self {
        Self::with_options(raw, StoreOptions::default())
    }

    /// Create a store with custom options
    pub fn with_options(raw: Value, options: StoreOptions) -> Self {
        let raw = if raw.is_null() { Value::empty_mapping() } else { raw };
        Self {
            inner: Arc::new(Inner {
                raw: RwLock::new(raw),
                singletons: Mutex::new(HashMap::new()),
                scopes: ScopeStack::default(),
                resolving: InProgress::new("resolved"),
                constructing: InProgress::new("constructed"),
                types: options.types,
                resolver: options.resolver.unwrap_or_else(|| Arc::new(GlobalResolver)),
                conf_patches: options.conf_patches,
            }),
        }
    }

    /// Whether both handles point at the same store
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve the value at a key path
    pub fn get(&self, path: &str) -> Result<Resolved> {
        self.resolve(path, None)
    }

    /// Resolve the value at a key path, or return `default` if it is absent.
    ///
    /// The default is returned unchanged. A malformed path or a non-mapping
    /// intermediate segment is still an error.
    pub fn get_or(&self, path: &str, default: impl Into<Resolved>) -> Result<Resolved> {
        self.resolve(path, Some(default.into()))
    }

    /// Resolve a string value
    pub fn get_str(&self, path: &str) -> Result<String> {
        let value = self.get(path)?;
        match value {
            Resolved::String(s) => Ok(s),
            other => Err(mismatch(path, "string", &other)),
        }
    }

    /// Resolve an integer value
    pub fn get_i64(&self, path: &str) -> Result<i64> {
        let value = self.get(path)?;
        value.as_i64().ok_or_else(|| mismatch(path, "integer", &value))
    }

    /// Resolve a float value (integers are widened)
    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let value = self.get(path)?;
        value.as_f64().ok_or_else(|| mismatch(path, "float", &value))
    }

    /// Resolve a boolean value
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        value.as_bool().ok_or_else(|| mismatch(path, "boolean", &value))
    }

    /// Resolve an object and downcast it
    pub fn get_object<T: Any + Send + Sync>(&self, path: &str) -> Result<Arc<T>> {
        let value = self.get(path)?;
        value
            .downcast::<T>()
            .ok_or_else(|| mismatch(path, std::any::type_name::<T>(), &value))
    }

    /// The unresolved value at a key path, marker strings intact
    pub fn raw(&self, path: &str) -> Result<Value> {
        self.read_raw()
            .lookup(path)?
            .cloned()
            .ok_or_else(|| Error::key_not_found(path))
    }

    /// Write a value at a key path, creating intermediate mappings.
    ///
    /// Singletons at or under the path are dropped from the cache. Writing a
    /// scope override `K/param` also drops the singleton at `K`.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.write_raw().set_path(path, value.into())?;
        self.invalidate(path);
        if let Some(owner) = override_owner(path) {
            self.invalidate(&owner);
        }
        Ok(())
    }

    /// The raw tree, optionally restricted to some top-level keys
    pub fn to_dict(&self, limit_keys: &[&str]) -> Result<Value> {
        let tree = self.read_raw().clone();
        if limit_keys.is_empty() {
            return Ok(tree);
        }

        let mut limited = IndexMap::new();
        for key in limit_keys {
            let value = tree
                .as_mapping()
                .and_then(|m| m.get(*key))
                .ok_or_else(|| Error::key_not_found(*key))?;
            limited.insert((*key).to_string(), value.clone());
        }
        Ok(Value::Mapping(limited))
    }

    /// Serialize the raw tree to a file, minus the given dotted keys
    pub fn write_conf_file(&self, path: impl AsRef<Path>, except_keys: &[&str]) -> Result<()> {
        let tree = self.to_dict(&[])?.stripped(except_keys)?;
        loader::write_file(path.as_ref(), &tree)?;

        let keys: Vec<&str> = tree
            .as_mapping()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        log::info!(
            "Wrote configurations for {:?} to {}",
            keys,
            path.as_ref().display()
        );
        Ok(())
    }

    /// Resolve every top-level key
    pub fn resolve_all(&self) -> Result<Resolved> {
        let keys: Vec<String> = self
            .read_raw()
            .as_mapping()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        let mut resolved = IndexMap::new();
        for key in keys {
            let value = self.get(&key)?;
            resolved.insert(key, value);
        }
        Ok(Resolved::Mapping(resolved))
    }

    /// Declared types table
    pub fn types(&self) -> &TypeTable {
        &self.inner.types
    }

    /// Names of the patch layers this store was built from
    pub fn conf_patches(&self) -> &[String] {
        &self.inner.conf_patches
    }

    /// Whether a singleton is cached for `path`
    pub fn is_cached(&self, path: &str) -> bool {
        self.singletons().contains_key(path)
    }

    /// A new store over a copy of this tree with `overrides` written on top.
    ///
    /// Types, resolver and patch names are shared; the singleton cache starts
    /// empty.
    pub fn derive<I, K, V>(&self, overrides: I) -> Result<Store>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut tree = self.read_raw().clone();
        for (key, value) in overrides {
            tree.set_path(key.as_ref(), value.into())?;
        }
        Ok(Self::with_options(
            tree,
            StoreOptions {
                types: self.inner.types.clone(),
                resolver: Some(Arc::clone(&self.inner.resolver)),
                conf_patches: self.inner.conf_patches.clone(),
            },
        ))
    }

    fn read_raw(&self) -> RwLockReadGuard<'_, Value> {
        self.inner.raw.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_raw(&self) -> RwLockWriteGuard<'_, Value> {
        self.inner.raw.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn singletons(&self) -> MutexGuard<'_, HashMap<String, Object>> {
        self.inner
            .singletons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self, path: &str) {
        // Dropped objects may read the store, so release the lock first
        let dropped: Vec<Object> = {
            let mut singletons = self.singletons();
            let keys: Vec<String> = singletons
                .keys()
                .filter(|key| is_at_or_under(key, path))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| singletons.remove(key))
                .collect()
        };
        if !dropped.is_empty() {
            log::debug!("Invalidated {} singleton(s) at '{}'", dropped.len(), path);
        }
    }

    fn resolve(&self, path: &str, default: Option<Resolved>) -> Result<Resolved> {
        split_path(path)?;
        let _guard = self.inner.resolving.enter(path)?;

        if let Some(value) = self.scope_override(path)? {
            return Ok(value);
        }

        // Clone out of the lock; resolution may call back into user code
        let (raw, overrides) = {
            let tree = self.read_raw();
            match tree.lookup_with_parent(path)? {
                Some((parent, leaf)) => (
                    leaf.clone(),
                    sibling_overrides(parent, last_segment(path)),
                ),
                None => {
                    return match default {
                        Some(default) => Ok(default),
                        None => Err(Error::key_not_found(path)),
                    }
                }
            }
        };

        self.resolve_node(path, raw, overrides)
    }

    fn scope_override(&self, path: &str) -> Result<Option<Resolved>> {
        match self.inner.scopes.lookup(last_segment(path)) {
            Some(value) => self.coerce(path, value).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_node(
        &self,
        path: &str,
        raw: Value,
        overrides: Vec<(String, Value)>,
    ) -> Result<Resolved> {
        let resolved = match raw {
            Value::Mapping(map) => {
                let mut resolved = IndexMap::with_capacity(map.len());
                for (key, child) in &map {
                    let child_path = join_path(path, key);
                    let value = match self.scope_override(&child_path)? {
                        Some(value) => value,
                        None => self.resolve_node(
                            &child_path,
                            child.clone(),
                            sibling_overrides(&map, key),
                        )?,
                    };
                    resolved.insert(key.clone(), value);
                }
                Resolved::Mapping(resolved)
            }
            Value::Sequence(seq) => Resolved::Sequence(
                seq.into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.resolve_node(&format!("{}[{}]", path, i), item, Vec::new())
                    })
                    .collect::<Result<_>>()?,
            ),
            Value::String(s) => match classify(&s) {
                Marker::Literal(text) | Marker::Escaped(text) => Resolved::from(text),
                Marker::Interpolation(target) => self.resolve(target, None)?,
                Marker::UnboundReference(name) => self
                    .inner
                    .resolver
                    .resolve(name)
                    .map_err(|e| e.or_path(path))?
                    .into_resolved(name),
                Marker::ConstructionReference(name) => self.construct(path, name, overrides)?,
            },
            scalar => Resolved::from(scalar),
        };

        self.coerce(path, resolved)
    }

    fn construct(
        &self,
        path: &str,
        name: &str,
        overrides: Vec<(String, Value)>,
    ) -> Result<Resolved> {
        if let Some(object) = self.singletons().get(path) {
            return Ok(Resolved::Object(Arc::clone(object)));
        }
        let _building = self.inner.constructing.enter(path)?;

        let factory = match self.inner.resolver.resolve(name).map_err(|e| e.or_path(path))? {
            Export::Factory(factory) => factory,
            other => {
                return Err(Error::reference(
                    name,
                    format!("'{}' is not callable ({:?})", name, other),
                )
                .with_path(path))
            }
        };

        // Overrides are resolved before the new frame is visible
        let mut frame = Frame::new();
        for (param, raw) in overrides {
            let override_path = format!("{}{}{}", path, SCOPE_SEPARATOR, param);
            let value = self.resolve_node(&override_path, raw, Vec::new())?;
            frame.insert(param, value);
        }

        log::debug!(
            "Constructing '{}' from @{}() with {} override(s)",
            path,
            name,
            frame.len()
        );
        let object = {
            let _active = crate::context::ensure_active(self);
            let _frame = self.inner.scopes.push(frame);
            factory().map_err(|e| e.or_path(path))?
        };

        self.singletons()
            .insert(path.to_string(), Arc::clone(&object));
        Ok(Resolved::Object(object))
    }

    fn coerce(&self, path: &str, value: Resolved) -> Result<Resolved> {
        match self.inner.types.get(path) {
            Some(ty) => ty.coerce(path, value),
            None => Ok(value),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Value::empty_mapping())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("raw", &*self.read_raw())
            .field("types", &self.inner.types)
            .field("conf_patches", &self.inner.conf_patches)
            .finish_non_exhaustive()
    }
}

/// `K/param` siblings of `key` in `parent`, as `(param, raw value)` pairs
fn sibling_overrides(parent: &IndexMap<String, Value>, key: &str) -> Vec<(String, Value)> {
    parent
        .iter()
        .filter_map(|(k, v)| match scope_param(k) {
            Some((owner, param)) if owner == key => Some((param.to_string(), v.clone())),
            _ => None,
        })
        .collect()
}

/// For a path ending in `K/param`, the full path of `K`
fn override_owner(path: &str) -> Option<String> {
    let (owner, _) = scope_param(last_segment(path))?;
    Some(match path.rsplit_once('.') {
        Some((parent, _)) => join_path(parent, owner),
        None => owner.to_string(),
    })
}

fn is_at_or_under(key: &str, path: &str) -> bool {
    match key.strip_prefix(path) {
        Some(rest) => {
            rest.is_empty()
                || rest.starts_with('.')
                || rest.starts_with('[')
                || rest.starts_with(SCOPE_SEPARATOR)
        }
        None => false,
    }
}

fn mismatch(path: &str, expected: &str, got: &Resolved) -> Error {
    Error::type_coercion(path, expected, format!("{} ({})", got.type_name(), got))
}
