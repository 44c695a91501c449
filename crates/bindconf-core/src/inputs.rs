//! Flag and named-input lookup
//!
//! Scalar overrides can come from outside the configuration files: command
//! line flags (`-key value`, `--key value`, `--key=value`) or a JSON object of
//! named inputs handed over by an orchestrator through [`INPUTS_ENV_VAR`].
//! Named inputs cannot contain dots, so `a.b` is looked up as `a__b`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Replaces `.` in key paths when looking up named inputs
pub const INPUT_DOT_REPLACEMENT: &str = "__";

/// Environment variable holding named inputs as a JSON object
pub const INPUTS_ENV_VAR: &str = "BINDCONF_INPUTS";

/// Trait for external scalar override sources
pub trait InputSource: Send + Sync {
    /// Raw override for a dotted key path, if any
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Flags from a command line
#[derive(Debug, Clone, Default)]
pub struct ArgvInputs {
    args: Vec<String>,
}

impl ArgvInputs {
    /// Wrap an argument list (without the program name)
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments of the current process
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1))
    }

    /// Value following `flag`, or attached to it with `=`
    pub fn flag(&self, flag: &str) -> Option<String> {
        let attached = format!("{}=", flag);
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == flag {
                return args.next().filter(|next| !is_flag(next)).cloned();
            }
            if let Some(value) = arg.strip_prefix(&attached) {
                return Some(value.to_string());
            }
        }
        None
    }
}

/// A token that starts another flag rather than giving a value; negative
/// numbers are values
fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token.parse::<f64>().is_err()
}

impl InputSource for ArgvInputs {
    fn lookup(&self, key: &str) -> Option<String> {
        self.flag(&format!("--{}", key))
    }
}

/// Named inputs keyed with dots replaced
#[derive(Debug, Clone, Default)]
pub struct NamedInputs {
    values: HashMap<String, String>,
}

impl NamedInputs {
    /// Parse a JSON object of named inputs.
    ///
    /// String values are kept verbatim; other scalars use their JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| Error::parse(format!("named inputs: {}", e)))?;

        let values = object
            .into_iter()
            .map(|(k, v)| {
                let raw = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, raw)
            })
            .collect();
        Ok(Self { values })
    }

    /// Read named inputs from [`INPUTS_ENV_VAR`]; unset means none
    pub fn from_env() -> Result<Self> {
        match std::env::var(INPUTS_ENV_VAR) {
            Ok(json) if !json.trim().is_empty() => {
                Self::from_json_str(&json)
                    .map_err(|e| e.with_help(format!("Check {}", INPUTS_ENV_VAR)))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Add an input under its dotted key
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.replace('.', INPUT_DOT_REPLACEMENT), value.into());
    }
}

impl InputSource for NamedInputs {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values
            .get(&key.replace('.', INPUT_DOT_REPLACEMENT))
            .cloned()
    }
}

/// Short flag, then long flag, then named inputs
#[derive(Debug, Clone, Default)]
pub struct CliInputs {
    argv: ArgvInputs,
    named: NamedInputs,
}

impl CliInputs {
    pub fn new(argv: ArgvInputs, named: NamedInputs) -> Self {
        Self { argv, named }
    }

    /// Process arguments plus named inputs from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ArgvInputs::from_env(), NamedInputs::from_env()?))
    }
}

impl InputSource for CliInputs {
    fn lookup(&self, key: &str) -> Option<String> {
        self.argv
            .flag(&format!("-{}", key))
            .or_else(|| self.argv.flag(&format!("--{}", key)))
            .or_else(|| self.named.lookup(key))
    }
}

/// Look up a raw input for `key` from the process arguments and environment
pub fn get_input(key: &str) -> Result<Option<String>> {
    Ok(CliInputs::from_env()?.lookup(key))
}

/// Parse a flag value as a YAML scalar (`5` is an integer, `true` a bool).
///
/// Anything that does not parse to a scalar stays a string.
pub fn parse_scalar(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::String(raw.to_string());
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Integer(_) | Value::Float(_) | Value::String(_))) => v,
        Ok(Value::Null) => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}
