//! bindconf-core: hierarchical configuration with parameter injection
//!
//! A store is built from layered sources and resolved on every `get`:
//! `${path}` interpolates another key, `@name` refers to something the host
//! registered, and `@name()` constructs it once per key. Targets declare which
//! parameters come from the configuration and get them filled at call time.
//!
//! # Example
//!
//! ```rust
//! use bindconf_core::{bind, init, Args, BoundArgs, InitOptions, Param, Signature, Value, INJECT};
//!
//! let conf: Value = serde_yaml::from_str("trainer:\n  lr: 0.01\n").unwrap();
//! init(InitOptions::from_conf(conf)).unwrap();
//!
//! let train = bind(
//!     Signature::new("train").param(Param::inject("lr", INJECT)),
//!     |args: BoundArgs| args.get_f64("lr"),
//! )
//! .with_subkeys("trainer");
//!
//! assert_eq!(train.call(Args::new()).unwrap(), 0.01);
//! assert_eq!(train.call(Args::new().kw("lr", 0.5)).unwrap(), 0.5);
//! ```

pub mod binding;
pub mod context;
pub mod error;
pub mod inputs;
pub mod loader;
pub mod marker;
pub mod registry;
pub mod resolved;
pub mod scope;
pub mod types;
pub mod validation;
pub mod value;

mod store;

pub use binding::{
    bind, bind_class, value, Args, Bound, BoundArgs, BoundClass, Configurable, Injection, Param,
    Signature, INJECT,
};
pub use context::{
    activate, active, conf_patches, deactivate, get, get_or, init, init_scoped, modified_conf, set,
    to_dict, types, write_conf_file, ActiveGuard, InitOptions, ScopedStore,
};
pub use error::{Error, ErrorKind, Result};
pub use inputs::{get_input, ArgvInputs, CliInputs, InputSource, NamedInputs};
pub use loader::Sources;
pub use registry::{global_registry, register_global, Export, ObjectResolver, Registry};
pub use resolved::{object, Callable, Factory, Object, Resolved};
pub use store::{Store, StoreOptions};
pub use types::{TypeTable, ValueType};
pub use validation::Validation;
pub use value::Value;
