//! The process-wide active store
//!
//! Bound targets and the free functions in this module read from one active
//! store. [`init`] replaces it for good. [`init_scoped`] and [`modified_conf`]
//! hand back a [`ScopedStore`] that is only active while the guard returned
//! by [`ScopedStore::enter`] is alive; dropping the guard restores whatever
//! was active before, on every exit path including panics.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::loader::Sources;
use crate::registry::ObjectResolver;
use crate::resolved::Resolved;
use crate::store::{Store, StoreOptions};
use crate::types::{TypeTable, ValueType};
use crate::validation::Validation;
use crate::value::Value;

static ACTIVE: RwLock<Option<Store>> = RwLock::new(None);

fn swap(store: Option<Store>) -> Option<Store> {
    let mut slot = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, store)
}

/// The active store
pub fn active() -> Result<Store> {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(Error::uninitialized)
}

/// Whether `store` is the active store
pub fn is_active(store: &Store) -> bool {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|active| active.ptr_eq(store))
}

/// Remove the active store, returning it
pub fn deactivate() -> Option<Store> {
    swap(None)
}

/// Restores the previously active store when dropped
#[must_use = "the previous store is restored as soon as the guard is dropped"]
pub struct ActiveGuard {
    previous: Option<Store>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        swap(self.previous.take());
    }
}

/// Make `store` active until the guard is dropped
pub fn activate(store: Store) -> ActiveGuard {
    ActiveGuard {
        previous: swap(Some(store)),
    }
}

/// Activate `store` unless it already is
pub(crate) fn ensure_active(store: &Store) -> Option<ActiveGuard> {
    if is_active(store) {
        None
    } else {
        Some(activate(store.clone()))
    }
}

/// Everything [`init`] needs to build a store
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Where the tree comes from
    pub sources: Sources,
    /// Declared types and object resolver
    pub store: StoreOptions,
    /// Checks run once the store is active
    pub validate: Option<Validation>,
}

impl InitOptions {
    pub fn new(sources: Sources) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }

    /// Options for a store built from an explicit tree
    pub fn from_conf(conf: Value) -> Self {
        Self::new(Sources::new().with_conf(conf))
    }

    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.store.types = types;
        self
    }

    /// Declare one type
    pub fn with_type(mut self, path: impl Into<String>, ty: ValueType) -> Self {
        self.store.types.insert(path.into(), ty);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ObjectResolver>) -> Self {
        self.store.resolver = Some(resolver);
        self
    }

    pub fn with_validation(mut self, validation: impl Into<Validation>) -> Self {
        self.validate = Some(validation.into());
        self
    }

    fn build(&self) -> Result<Store> {
        let tree = self.sources.compose()?;
        let mut options = self.store.clone();
        if options.conf_patches.is_empty() {
            options.conf_patches = self.sources.conf_patches.clone();
        }
        Ok(Store::with_options(tree, options))
    }
}

fn announce() {
    if ACTIVE.read().unwrap_or_else(PoisonError::into_inner).is_none() {
        log::info!("Declaring config");
    } else {
        log::info!("Redeclaring config");
    }
}

/// Build a store, make it active, then run validation.
///
/// The store stays active even if validation fails.
pub fn init(options: InitOptions) -> Result<()> {
    let store = options.build()?;
    announce();
    swap(Some(store));
    match &options.validate {
        Some(validation) => validation.run(),
        None => Ok(()),
    }
}

/// Build a store without activating it
pub fn init_scoped(options: InitOptions) -> Result<ScopedStore> {
    let store = options.build()?;
    announce();
    Ok(ScopedStore {
        store,
        validate: options.validate,
    })
}

/// Store derived from the active one with `overrides` written at the top.
///
/// The derived store shares declared types and resolver, starts with an
/// empty singleton cache and runs no validation.
pub fn modified_conf<I, K, V>(overrides: I) -> Result<ScopedStore>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Value>,
{
    Ok(ScopedStore {
        store: active()?.derive(overrides)?,
        validate: None,
    })
}

/// A store that is active only while entered
#[derive(Debug, Clone)]
pub struct ScopedStore {
    store: Store,
    validate: Option<Validation>,
}

impl ScopedStore {
    /// A scoped store over an existing store
    pub fn new(store: Store) -> Self {
        Self {
            store,
            validate: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Activate the store and run validation.
    ///
    /// On validation failure the previous store is restored before the error
    /// is returned.
    pub fn enter(&self) -> Result<ActiveGuard> {
        let guard = activate(self.store.clone());
        if let Some(validation) = &self.validate {
            validation.run()?;
        }
        Ok(guard)
    }

    /// Run `f` with the store active
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.enter()?;
        Ok(f())
    }
}

/// Resolve a key in the active store
pub fn get(key: &str) -> Result<Resolved> {
    active()?.get(key)
}

/// Resolve a key in the active store, or return `default` if it is absent
pub fn get_or(key: &str, default: impl Into<Resolved>) -> Result<Resolved> {
    active()?.get_or(key, default)
}

/// Write a key in the active store
pub fn set(key: &str, value: impl Into<Value>) -> Result<()> {
    active()?.set(key, value)
}

/// Raw tree of the active store
pub fn to_dict(limit_keys: &[&str]) -> Result<Value> {
    active()?.to_dict(limit_keys)
}

/// Serialize the active store's raw tree
pub fn write_conf_file(path: impl AsRef<Path>, except_keys: &[&str]) -> Result<()> {
    active()?.write_conf_file(path, except_keys)
}

/// Declared types of the active store
pub fn types() -> Result<TypeTable> {
    Ok(active()?.types().clone())
}

/// Patch names the active store was built from
pub fn conf_patches() -> Result<Vec<String>> {
    Ok(active()?.conf_patches().to_vec())
}

#[cfg(test)]
static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Serializes tests that touch the active store
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
