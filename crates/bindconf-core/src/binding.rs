//! Parameter injection
//!
//! A target declares its parameters once with a [`Signature`]. Parameters
//! whose default is an [`Injection`] are filled from the configuration when
//! the caller leaves them out:
//!
//! ```ignore
//! let train = bind(
//!     Signature::new("train")
//!         .param(Param::inject("lr", INJECT))
//!         .param(Param::inject("epochs", value(Some(".max_epochs"), Some(10.into())))),
//!     |args: BoundArgs| Ok(args.get_f64("lr")? * args.get_i64("epochs")? as f64),
//! )
//! .with_subkeys("trainer");
//!
//! // trainer.lr and trainer.max_epochs come from the active store
//! train.call(Args::new())?;
//! // an explicit argument always wins
//! train.call(Args::new().kw("lr", 0.5))?;
//! ```

use indexmap::IndexMap;
use std::any::Any;
use std::sync::Arc;

use crate::context;
use crate::error::{Error, Result};
use crate::resolved::Resolved;
use crate::store::Store;
use crate::value::join_path;

/// Where an injectable parameter gets its value
#[derive(Debug, Clone, PartialEq)]
pub enum Injection {
    /// Resolve the parameter's own key; fail if it is missing
    Sentinel,
    /// Resolve `key` (or the parameter's own key), falling back to `default`
    Value {
        key: Option<String>,
        default: Resolved,
    },
}

/// Bare injection marker: resolve the parameter's key with no fallback
pub const INJECT: Injection = Injection::Sentinel;

/// Injection descriptor with an optional key and fallback.
///
/// A key starting with `.` is relative to the wrapper's subkeys; any other
/// key is absolute. Without a fallback, a missing key injects `Null`.
pub fn value(key: Option<&str>, default: Option<Resolved>) -> Injection {
    Injection::Value {
        key: key.map(str::to_string),
        default: default.unwrap_or_default(),
    }
}

/// Declared default of a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    Required,
    Literal(Resolved),
    Inject(Injection),
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    default: ParamDefault,
}

impl Param {
    /// A parameter the caller must supply
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: ParamDefault::Required,
        }
    }

    /// A parameter with a plain default
    pub fn with_default(name: impl Into<String>, default: impl Into<Resolved>) -> Self {
        Self {
            name: name.into(),
            default: ParamDefault::Literal(default.into()),
        }
    }

    /// A parameter filled from the configuration when omitted
    pub fn inject(name: impl Into<String>, injection: Injection) -> Self {
        Self {
            name: name.into(),
            default: ParamDefault::Inject(injection),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> &ParamDefault {
        &self.default
    }
}

/// Declared parameter list of a target
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: String,
    params: Vec<Param>,
}

impl Signature {
    /// Start a signature for the target called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Bind caller arguments like a plain call would.
    ///
    /// Positional arguments fill parameters in order, keywords by name, and
    /// gaps take their declared defaults. Injectable defaults are left
    /// pending rather than resolved.
    pub fn bind(&self, args: Args) -> Result<BoundArgs> {
        let fail = |msg: String| Error::binding(&self.name, msg);

        if let Some(dup) = self
            .params
            .iter()
            .enumerate()
            .find(|(i, p)| self.params[..*i].iter().any(|q| q.name == p.name))
        {
            return Err(fail(format!("parameter '{}' is declared twice", dup.1.name)));
        }

        if args.positional.len() > self.params.len() {
            return Err(fail(format!(
                "takes {} positional argument(s) but {} were given",
                self.params.len(),
                args.positional.len()
            )));
        }

        let mut supplied: Vec<Option<Resolved>> = vec![None; self.params.len()];
        for (slot, value) in supplied.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (name, value) in args.keyword {
            let index = self
                .params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| fail(format!("unexpected keyword argument '{}'", name)))?;
            if supplied[index].is_some() {
                return Err(fail(format!("got multiple values for argument '{}'", name)));
            }
            supplied[index] = Some(value);
        }

        let mut bound = BoundArgs {
            target: self.name.clone(),
            values: IndexMap::new(),
            pending: IndexMap::new(),
        };
        let mut missing = Vec::new();
        for (param, slot) in self.params.iter().zip(supplied) {
            match (slot, &param.default) {
                (Some(value), _) => {
                    bound.values.insert(param.name.clone(), value);
                }
                (None, ParamDefault::Literal(value)) => {
                    bound.values.insert(param.name.clone(), value.clone());
                }
                (None, ParamDefault::Inject(injection)) => {
                    bound.pending.insert(param.name.clone(), injection.clone());
                }
                (None, ParamDefault::Required) => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(fail(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }

        Ok(bound)
    }
}

/// Caller arguments
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Resolved>,
    keyword: Vec<(String, Resolved)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Resolved>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument
    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Resolved>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }
}

/// Arguments bound to a signature
#[derive(Debug, Clone)]
pub struct BoundArgs {
    target: String,
    values: IndexMap<String, Resolved>,
    pending: IndexMap<String, Injection>,
}

impl BoundArgs {
    /// Value bound to `name`, if any
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.values.get(name)
    }

    /// Injection still waiting for a value.
    ///
    /// Only arguments bound without injection (straight through
    /// [`Signature::bind`]) have pending entries.
    pub fn pending(&self, name: &str) -> Option<&Injection> {
        self.pending.get(name)
    }

    /// Value bound to `name`, or a binding error naming the target
    pub fn require(&self, name: &str) -> Result<&Resolved> {
        self.values.get(name).ok_or_else(|| {
            let reason = if self.pending.contains_key(name) {
                "was not injected"
            } else {
                "is not a bound parameter"
            };
            Error::binding(&self.target, format!("'{}' {}", name, reason))
        })
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        let value = self.require(name)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(name, "string", value))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| self.mismatch(name, "integer", value))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| self.mismatch(name, "float", value))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| self.mismatch(name, "boolean", value))
    }

    /// Bound object downcast to `T`
    pub fn get_object<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self.require(name)?;
        value
            .downcast::<T>()
            .ok_or_else(|| self.mismatch(name, std::any::type_name::<T>(), value))
    }

    /// All bound values in declaration order
    pub fn values(&self) -> &IndexMap<String, Resolved> {
        &self.values
    }

    pub fn into_values(self) -> IndexMap<String, Resolved> {
        self.values
    }

    fn fill(&mut self, name: &str, value: Resolved) {
        self.pending.shift_remove(name);
        self.values.insert(name.to_string(), value);
    }

    fn mismatch(&self, name: &str, expected: &str, got: &Resolved) -> Error {
        Error::type_coercion(
            format!("{}({})", self.target, name),
            expected,
            format!("{} ({})", got.type_name(), got),
        )
    }
}

/// Precomputed key and fallback for one injectable parameter
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInjection {
    pub param: String,
    pub key: String,
    pub fallback: Option<Resolved>,
}

/// Injection steps for a signature under a subkeys namespace
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindingPlan {
    steps: Vec<PlannedInjection>,
}

impl BindingPlan {
    pub fn new(signature: &Signature, subkeys: Option<&str>) -> Self {
        let steps = signature
            .params
            .iter()
            .filter_map(|param| match &param.default {
                ParamDefault::Inject(Injection::Sentinel) => Some(PlannedInjection {
                    param: param.name.clone(),
                    key: injection_key(&param.name, None, subkeys),
                    fallback: None,
                }),
                ParamDefault::Inject(Injection::Value { key, default }) => Some(PlannedInjection {
                    param: param.name.clone(),
                    key: injection_key(&param.name, key.as_deref(), subkeys),
                    fallback: Some(default.clone()),
                }),
                _ => None,
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PlannedInjection] {
        &self.steps
    }
}

fn injection_key(param: &str, key: Option<&str>, subkeys: Option<&str>) -> String {
    match (key, subkeys) {
        (None, Some(subkeys)) => join_path(subkeys, param),
        (None, None) => param.to_string(),
        (Some(key), Some(subkeys)) if key.starts_with('.') => format!("{}{}", subkeys, key),
        (Some(key), None) if key.starts_with('.') => key[1..].to_string(),
        (Some(key), _) => key.to_string(),
    }
}

/// A target wrapped for injection
#[derive(Debug, Clone)]
pub struct Bound<F> {
    signature: Signature,
    subkeys: Option<String>,
    plan: BindingPlan,
    target: F,
}

/// Wrap `target` so omitted injectable parameters come from the configuration
pub fn bind<F>(signature: Signature, target: F) -> Bound<F> {
    let plan = BindingPlan::new(&signature, None);
    Bound {
        signature,
        subkeys: None,
        plan,
        target,
    }
}

impl<F> Bound<F> {
    /// Resolve parameter keys relative to `subkeys`
    pub fn with_subkeys(mut self, subkeys: impl Into<String>) -> Self {
        let subkeys = subkeys.into();
        self.plan = BindingPlan::new(&self.signature, Some(&subkeys));
        self.subkeys = Some(subkeys);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn subkeys(&self) -> Option<&str> {
        self.subkeys.as_deref()
    }

    pub fn plan(&self) -> &BindingPlan {
        &self.plan
    }

    /// The wrapped target, without injection
    pub fn inner(&self) -> &F {
        &self.target
    }

    /// Bind `args` and fill pending injections from `store`, or the active
    /// store when `None`
    pub fn inject(&self, store: Option<&Store>, args: Args) -> Result<BoundArgs> {
        let mut bound = self.signature.bind(args)?;
        let store = match store {
            Some(store) => store.clone(),
            None => context::active()?,
        };

        for step in &self.plan.steps {
            if bound.pending(&step.param).is_none() {
                continue;
            }
            let resolved = match &step.fallback {
                Some(fallback) => store.get_or(&step.key, fallback.clone()),
                None => store.get(&step.key),
            };
            match resolved {
                Ok(value) => bound.fill(&step.param, value),
                Err(e) => {
                    log::warn!(
                        "Trying to assign configurations to {}: '{}' from '{}' failed",
                        self.signature.name,
                        step.param,
                        step.key
                    );
                    return Err(e);
                }
            }
        }
        Ok(bound)
    }

    /// Call a free function or constructor with injection from the active store
    pub fn call<R>(&self, args: Args) -> Result<R>
    where
        F: Fn(BoundArgs) -> Result<R>,
    {
        (self.target)(self.inject(None, args)?)
    }

    /// Call with injection from an explicit store
    pub fn call_in<R>(&self, store: &Store, args: Args) -> Result<R>
    where
        F: Fn(BoundArgs) -> Result<R>,
    {
        (self.target)(self.inject(Some(store), args)?)
    }

    /// Call a method on `this` with injection from the active store
    pub fn call_on<S: ?Sized, R>(&self, this: &S, args: Args) -> Result<R>
    where
        F: Fn(&S, BoundArgs) -> Result<R>,
    {
        (self.target)(this, self.inject(None, args)?)
    }
}

/// A type that can be built from bound arguments
pub trait Configurable: Sized {
    /// Constructor parameters
    fn signature() -> Signature;

    /// Build an instance from bound arguments
    fn from_args(args: BoundArgs) -> Result<Self>;
}

/// Constructor of `T` with injection
pub struct BoundClass<T> {
    bound: Bound<fn(BoundArgs) -> Result<T>>,
}

/// Wrap `T`'s constructor for injection; instances are plain `T`s
pub fn bind_class<T: Configurable>() -> BoundClass<T> {
    BoundClass {
        bound: bind(T::signature(), T::from_args as fn(BoundArgs) -> Result<T>),
    }
}

impl<T: Configurable> BoundClass<T> {
    pub fn with_subkeys(self, subkeys: impl Into<String>) -> Self {
        Self {
            bound: self.bound.with_subkeys(subkeys),
        }
    }

    pub fn plan(&self) -> &BindingPlan {
        self.bound.plan()
    }

    /// Construct a `T` with injection from the active store
    #[allow(clippy::new_ret_no_self)]
    pub fn new(&self, args: Args) -> Result<T> {
        self.bound.call(args)
    }

    /// Construct a `T` with injection from an explicit store
    pub fn new_in(&self, store: &Store, args: Args) -> Result<T> {
        self.bound.call_in(store, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn store(yaml: &str) -> Store {
        Store::new(serde_yaml::from_str::<Value>(yaml).unwrap())
    }

    fn signature() -> Signature {
        Signature::new("train")
            .param(Param::required("data"))
            .param(Param::with_default("verbose", false))
            .param(Param::inject("lr", INJECT))
            .param(Param::inject("epochs", value(Some(".max_epochs"), Some(Resolved::Integer(10)))))
            .param(Param::inject("seed", value(Some("global.seed"), None)))
    }

    #[test]
    fn test_bind_like_a_call() {
        let bound = signature()
            .bind(Args::new().arg("train.csv").kw("lr", 0.1))
            .unwrap();

        assert_eq!(bound.get("data"), Some(&Resolved::from("train.csv")));
        assert_eq!(bound.get("verbose"), Some(&Resolved::Bool(false)));
        assert_eq!(bound.get("lr"), Some(&Resolved::Float(0.1)));
        assert_eq!(bound.pending("lr"), None);
        assert!(bound.pending("epochs").is_some());
    }

    #[test]
    fn test_unwrapped_keeps_sentinel() {
        let bound = signature().bind(Args::new().arg("x")).unwrap();

        assert_eq!(bound.pending("lr"), Some(&INJECT));
        assert_eq!(bound.get("lr"), None);
        assert!(matches!(
            bound.require("lr").unwrap_err().kind,
            ErrorKind::BindingSignature { .. }
        ));
    }

    #[test]
    fn test_bind_errors_name_target() {
        let sig = signature();
        let target = ErrorKind::BindingSignature {
            target: "train".into(),
        };

        let too_many = Args::new().arg(1).arg(2).arg(3).arg(4).arg(5).arg(6);
        assert_eq!(sig.bind(too_many).unwrap_err().kind, target);
        assert_eq!(sig.bind(Args::new()).unwrap_err().kind, target);
        assert_eq!(
            sig.bind(Args::new().arg(1).kw("nope", 1)).unwrap_err().kind,
            target
        );

        let err = sig.bind(Args::new().arg(1).kw("data", 2)).unwrap_err();
        assert!(err.to_string().contains("multiple values for argument 'data'"));

        let dup = Signature::new("dup")
            .param(Param::required("a"))
            .param(Param::required("a"));
        assert!(dup.bind(Args::new().arg(1).arg(2)).is_err());
    }

    #[test]
    fn test_injection_keys() {
        assert_eq!(injection_key("lr", None, None), "lr");
        assert_eq!(injection_key("lr", None, Some("opt")), "opt.lr");
        assert_eq!(injection_key("lr", Some(".rate"), Some("opt")), "opt.rate");
        assert_eq!(injection_key("lr", Some(".rate"), None), "rate");
        assert_eq!(injection_key("lr", Some("abs.rate"), Some("opt")), "abs.rate");
    }

    #[test]
    fn test_plan_computed_once_per_subkeys() {
        let wrapped = bind(signature(), |args: BoundArgs| Ok::<_, Error>(args)).with_subkeys("trainer");
        let keys: Vec<&str> = wrapped.plan().steps().iter().map(|s| s.key.as_str()).collect();

        assert_eq!(keys, vec!["trainer.lr", "trainer.max_epochs", "global.seed"]);
        assert_eq!(wrapped.plan().steps()[0].fallback, None);
        assert_eq!(wrapped.plan().steps()[2].fallback, Some(Resolved::Null));
    }

    #[test]
    fn test_call_in_explicit_store() {
        let s = store("trainer: {lr: 0.01, max_epochs: 3}\n");
        let wrapped = bind(signature(), |args: BoundArgs| {
            Ok((args.get_f64("lr")?, args.get_i64("epochs")?, args.get("seed").cloned()))
        })
        .with_subkeys("trainer");

        let (lr, epochs, seed) = wrapped.call_in(&s, Args::new().arg("d")).unwrap();
        assert_eq!(lr, 0.01);
        assert_eq!(epochs, 3);
        assert_eq!(seed, Some(Resolved::Null));

        // Explicit arguments win, for that call only
        let (lr, _, _) = wrapped.call_in(&s, Args::new().arg("d").kw("lr", 1.0)).unwrap();
        assert_eq!(lr, 1.0);
        let (lr, _, _) = wrapped.call_in(&s, Args::new().arg("d")).unwrap();
        assert_eq!(lr, 0.01);
    }

    #[test]
    fn test_missing_sentinel_key() {
        let s = store("trainer: {}\n");
        let wrapped = bind(signature(), |args: BoundArgs| Ok(args)).with_subkeys("trainer");

        let err = wrapped.call_in(&s, Args::new().arg("d")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyNotFound);
        assert_eq!(err.path.as_deref(), Some("trainer.lr"));

        let bound = wrapped
            .call_in(&s, Args::new().arg("d").kw("lr", 0.2))
            .unwrap();
        assert_eq!(bound.get_i64("epochs").unwrap(), 10);
    }

    #[test]
    fn test_call_requires_active_store() {
        let _lock = context::test_lock();
        let _previous = context::deactivate();
        let wrapped = bind(signature(), |args: BoundArgs| Ok(args));

        let err = wrapped.call(Args::new().arg("d")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UninitializedConfig);

        // Signature errors come first
        let err = wrapped.call(Args::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BindingSignature { .. }));
    }

    struct Model {
        width: i64,
        name: String,
    }

    impl Model {
        fn describe(&self, args: BoundArgs) -> Result<String> {
            Ok(format!("{}:{}x{}", self.name, self.width, args.get_i64("depth")?))
        }
    }

    impl Configurable for Model {
        fn signature() -> Signature {
            Signature::new("Model")
                .param(Param::inject("width", INJECT))
                .param(Param::inject("name", value(None, Some("default".into()))))
        }

        fn from_args(args: BoundArgs) -> Result<Self> {
            Ok(Model {
                width: args.get_i64("width")?,
                name: args.get_str("name")?,
            })
        }
    }

    #[test]
    fn test_bind_class_and_method() {
        let _lock = context::test_lock();
        let s = store("model: {width: 32, depth: 4}\n");
        let _active = context::activate(s.clone());

        let class = bind_class::<Model>().with_subkeys("model");
        let model: Model = class.new(Args::new()).unwrap();
        assert_eq!(model.width, 32);
        assert_eq!(model.name, "default");

        let explicit = class.new_in(&s, Args::new().kw("width", 8)).unwrap();
        assert_eq!(explicit.width, 8);

        let describe = bind(
            Signature::new("Model.describe")
                .param(Param::inject("depth", value(Some("model.depth"), None))),
            Model::describe,
        );
        assert_eq!(describe.call_on(&model, Args::new()).unwrap(), "default:32x4");
        assert_eq!(
            describe.call_on(&model, Args::new().arg(2)).unwrap(),
            "default:32x2"
        );
    }
}
