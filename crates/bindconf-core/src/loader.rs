//! Loading and composing configuration sources
//!
//! Layers are merged lowest to highest precedence:
//! 1. the explicit tree, explicit files, then `<conf_dir>/<base_conf>`
//! 2. named patch files from `conf_dir`, in order
//! 3. the explicit overrides tree
//! 4. flag overrides for existing leaf paths (opt-in)
//!
//! `_file` directives inside loaded files are expanded before anything
//! merges, so patches always apply to the fully composed base.

use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::inputs::{self, CliInputs, InputSource};
use crate::value::Value;

/// Default base file name inside `conf_dir`
pub const BASE_CONF: &str = "base";

/// Mapping key that substitutes another file's tree for its node
pub const FILE_DIRECTIVE: &str = "_file";

/// Extensions tried, in order, when a file name has none
pub const CONF_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Parse a file into a tree; an empty document is an empty mapping
fn parse_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::file_not_found(path.display()),
        _ => Error::io(path.display(), e),
    })?;

    if content.trim().is_empty() {
        return Ok(Value::empty_mapping());
    }

    let value: Value = match Format::of(path) {
        Format::Json => serde_json::from_str(&content)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?,
        Format::Yaml => serde_yaml::from_str(&content)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?,
    };

    Ok(if value.is_null() {
        Value::empty_mapping()
    } else {
        value
    })
}

/// Read a mapping tree from a YAML or JSON file (chosen by extension)
pub fn read_file(path: &Path) -> Result<Value> {
    let value = parse_file(path)?;
    if !value.is_mapping() {
        return Err(Error::parse(format!(
            "{}: top-level value must be a mapping, got {}",
            path.display(),
            value.type_name()
        )));
    }
    Ok(value)
}

/// Write a tree to a YAML or JSON file (chosen by extension)
pub fn write_file(path: &Path, value: &Value) -> Result<()> {
    let content = match Format::of(path) {
        Format::Json => serde_json::to_string_pretty(value)
            .map_err(|e| Error::parse(e.to_string()))?,
        Format::Yaml => serde_yaml::to_string(value).map_err(|e| Error::parse(e.to_string()))?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent.display(), e))?;
    }
    std::fs::write(path, content).map_err(|e| Error::io(path.display(), e))
}

/// Locate `name` in `dir`, trying the known extensions if needed
pub fn find_conf(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.is_file() {
        return Some(exact);
    }
    CONF_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", name, ext)))
        .find(|candidate| candidate.is_file())
}

/// Read a file and expand its `_file` directives
pub fn load_file(path: &Path) -> Result<Value> {
    let mut chain = Vec::new();
    let value = include(path, &mut chain)?;
    if !value.is_mapping() {
        return Err(Error::parse(format!(
            "{}: top-level value must be a mapping, got {}",
            path.display(),
            value.type_name()
        )));
    }
    Ok(value)
}

/// Expand `_file` directives in a tree, relative to `dir`
pub fn expand_file_directives(value: Value, dir: &Path) -> Result<Value> {
    expand(value, dir, &mut Vec::new())
}

fn include(path: &Path, chain: &mut Vec<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if chain.contains(&key) {
        let names: Vec<String> = chain
            .iter()
            .chain(std::iter::once(&key))
            .map(|p| p.display().to_string())
            .collect();
        return Err(Error::parse(format!(
            "{} include cycle: {}",
            FILE_DIRECTIVE,
            names.join(" → ")
        )));
    }

    chain.push(key);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let result = parse_file(path).and_then(|value| expand(value, dir, chain));
    chain.pop();
    result
}

fn expand(value: Value, dir: &Path, chain: &mut Vec<PathBuf>) -> Result<Value> {
    match value {
        Value::Mapping(map) => {
            if let Some(target) = map.get(FILE_DIRECTIVE) {
                let name = target.as_str().ok_or_else(|| {
                    Error::parse(format!(
                        "{} must name a file, got {}",
                        FILE_DIRECTIVE,
                        target.type_name()
                    ))
                })?;
                if map.len() > 1 {
                    let dropped: Vec<&str> = map
                        .keys()
                        .map(String::as_str)
                        .filter(|k| *k != FILE_DIRECTIVE)
                        .collect();
                    log::debug!("Discarding {:?} next to {}: {}", dropped, FILE_DIRECTIVE, name);
                }
                let path = find_conf(dir, name)
                    .ok_or_else(|| Error::file_not_found(dir.join(name).display()))?;
                return include(&path, chain);
            }

            let mut expanded = IndexMap::with_capacity(map.len());
            for (key, child) in map {
                let child = expand(child, dir, chain).map_err(|e| e.or_path(key.clone()))?;
                expanded.insert(key, child);
            }
            Ok(Value::Mapping(expanded))
        }
        Value::Sequence(seq) => Ok(Value::Sequence(
            seq.into_iter()
                .map(|item| expand(item, dir, chain))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other),
    }
}

/// Where a store's tree comes from
#[derive(Clone, Default)]
pub struct Sources {
    /// Explicit tree, merged first
    pub conf: Option<Value>,
    /// Files merged in order after `conf`
    pub conf_files: Vec<PathBuf>,
    /// Directory holding the base and patch files
    pub conf_dir: Option<PathBuf>,
    /// Base file name in `conf_dir`; [`BASE_CONF`] when unset
    pub base_conf: Option<String>,
    /// Patch file names in `conf_dir`, applied in order
    pub conf_patches: Vec<String>,
    /// Deep-merged after the patches
    pub overrides: Option<Value>,
    /// Apply flag overrides to existing leaf paths
    pub cli_overrides: bool,
    /// Flag source; process arguments and [`inputs::INPUTS_ENV_VAR`] when unset
    pub inputs: Option<Arc<dyn InputSource>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conf(mut self, conf: Value) -> Self {
        self.conf = Some(conf);
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.conf_files.push(path.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = Some(dir.into());
        self
    }

    pub fn with_base(mut self, name: impl Into<String>) -> Self {
        self.base_conf = Some(name.into());
        self
    }

    pub fn with_patch(mut self, name: impl Into<String>) -> Self {
        self.conf_patches.push(name.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_cli_overrides(mut self, enabled: bool) -> Self {
        self.cli_overrides = enabled;
        self
    }

    pub fn with_inputs(mut self, inputs: Arc<dyn InputSource>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Merge every layer into one tree
    pub fn compose(&self) -> Result<Value> {
        let conf_dir = self.conf_dir.as_deref().unwrap_or_else(|| Path::new("."));
        let mut tree = Value::empty_mapping();

        if let Some(conf) = self.conf.as_ref().filter(|c| !c.is_null()) {
            if !conf.is_mapping() {
                return Err(Error::parse(format!(
                    "conf must be a mapping, got {}",
                    conf.type_name()
                )));
            }
            tree.merge(expand_file_directives(conf.clone(), conf_dir)?);
        }

        for file in &self.conf_files {
            tree.merge(load_file(file)?);
        }

        if self.conf_dir.is_some() || self.base_conf.is_some() {
            let name = self.base_conf.as_deref().unwrap_or(BASE_CONF);
            match find_conf(conf_dir, name) {
                Some(path) => tree.merge(load_file(&path)?),
                None if self.base_conf.is_none() => {
                    log::debug!("No {} configuration in {}", BASE_CONF, conf_dir.display());
                }
                None => return Err(Error::file_not_found(conf_dir.join(name).display())),
            }
        }

        for patch in &self.conf_patches {
            let path = find_conf(conf_dir, patch)
                .ok_or_else(|| Error::file_not_found(conf_dir.join(patch).display()))?;
            tree.merge(load_file(&path)?);
        }

        if let Some(overrides) = self.overrides.as_ref().filter(|o| !o.is_null()) {
            tree.merge(overrides.clone());
        }
        if !tree.is_mapping() {
            return Err(Error::parse(format!(
                "overrides must be a mapping, got {}",
                tree.type_name()
            )));
        }

        if self.cli_overrides {
            let inputs: Arc<dyn InputSource> = match &self.inputs {
                Some(inputs) => Arc::clone(inputs),
                None => Arc::new(CliInputs::from_env()?),
            };
            apply_inputs(&mut tree, inputs.as_ref())?;
        }

        Ok(tree)
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources")
            .field("conf", &self.conf)
            .field("conf_files", &self.conf_files)
            .field("conf_dir", &self.conf_dir)
            .field("base_conf", &self.base_conf)
            .field("conf_patches", &self.conf_patches)
            .field("overrides", &self.overrides)
            .field("cli_overrides", &self.cli_overrides)
            .finish_non_exhaustive()
    }
}

/// Replace existing leaves with flag values
fn apply_inputs(tree: &mut Value, inputs: &dyn InputSource) -> Result<()> {
    for path in tree.leaf_paths() {
        if let Some(raw) = inputs.lookup(&path) {
            log::debug!("Overriding '{}' from flags with {:?}", path, raw);
            tree.set_path(&path, inputs::parse_scalar(&raw))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::inputs::NamedInputs;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_read_write_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let tree = yaml("a: 1\nb: {c: '${a}', d: [x, '@mod.make()']}\n");

        for name in ["out.yaml", "out.json", "nested/out.yml"] {
            let path = dir.path().join(name);
            write_file(&path, &tree).unwrap();
            assert_eq!(read_file(&path).unwrap(), tree, "{}", name);
        }

        let json = fs::read_to_string(dir.path().join("out.json")).unwrap();
        assert!(json.trim_start().starts_with('{'));
    }

    #[test]
    fn test_read_empty_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.yaml"), "").unwrap();
        fs::write(dir.path().join("list.yaml"), "- 1\n- 2\n").unwrap();
        fs::write(dir.path().join("bad.json"), "{nope").unwrap();

        assert_eq!(
            read_file(&dir.path().join("empty.yaml")).unwrap(),
            Value::empty_mapping()
        );
        assert_eq!(
            read_file(&dir.path().join("list.yaml")).unwrap_err().kind,
            ErrorKind::Parse
        );
        assert_eq!(
            read_file(&dir.path().join("bad.json")).unwrap_err().kind,
            ErrorKind::Parse
        );
        assert_eq!(
            read_file(&dir.path().join("missing.yaml")).unwrap_err().kind,
            ErrorKind::Io
        );
    }

    #[test]
    fn test_find_conf_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yml"), "a: 1\n").unwrap();
        fs::write(dir.path().join("patch.json"), "{}").unwrap();

        assert_eq!(find_conf(dir.path(), "base"), Some(dir.path().join("base.yml")));
        assert_eq!(find_conf(dir.path(), "patch"), Some(dir.path().join("patch.json")));
        assert_eq!(
            find_conf(dir.path(), "patch.json"),
            Some(dir.path().join("patch.json"))
        );
        assert_eq!(find_conf(dir.path(), "other"), None);
    }

    #[test]
    fn test_file_directive_replaces_node() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("models")).unwrap();
        fs::write(
            dir.path().join("base.yaml"),
            "model:\n  _file: models/small\n  ignored: true\nseed: 1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("models/small.yaml"),
            "layers: 2\nencoder:\n  _file: encoder.yaml\n",
        )
        .unwrap();
        fs::write(dir.path().join("models/encoder.yaml"), "width: 64\n").unwrap();

        let tree = load_file(&dir.path().join("base.yaml")).unwrap();
        assert_eq!(
            tree,
            yaml("model:\n  layers: 2\n  encoder:\n    width: 64\nseed: 1\n")
        );
    }

    #[test]
    fn test_file_directive_cycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "b:\n  _file: b\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "a:\n  _file: a\n").unwrap();

        let err = load_file(&dir.path().join("a.yaml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.to_string().contains("include cycle"));
    }

    #[test]
    fn test_file_directive_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "a:\n  _file: nowhere\n").unwrap();

        let err = load_file(&dir.path().join("base.yaml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert_eq!(err.path.as_deref(), Some("a"));
    }

    #[test]
    fn test_compose_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "key1: val1\nkeep: base\n").unwrap();
        fs::write(dir.path().join("patch.yaml"), "key1: val2\n").unwrap();

        let sources = Sources::new().with_dir(dir.path()).with_patch("patch");
        let tree = sources.compose().unwrap();
        assert_eq!(tree, yaml("key1: val2\nkeep: base\n"));

        let tree = sources
            .with_overrides(yaml("key1: overwritten\n"))
            .compose()
            .unwrap();
        assert_eq!(tree, yaml("key1: overwritten\nkeep: base\n"));
    }

    #[test]
    fn test_compose_conf_then_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extra.json");
        fs::write(&file, r#"{"a": {"b": 2}, "list": [3]}"#).unwrap();

        let tree = Sources::new()
            .with_conf(yaml("a: {b: 1, c: 1}\nlist: [1, 2]\n"))
            .with_file(&file)
            .compose()
            .unwrap();
        assert_eq!(tree, yaml("a: {b: 2, c: 1}\nlist: [3]\n"));
    }

    #[test]
    fn test_compose_missing_base() {
        let dir = tempfile::tempdir().unwrap();

        // The default base is optional
        let tree = Sources::new().with_dir(dir.path()).compose().unwrap();
        assert_eq!(tree, Value::empty_mapping());

        let err = Sources::new()
            .with_dir(dir.path())
            .with_base("custom")
            .compose()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);

        let err = Sources::new()
            .with_dir(dir.path())
            .with_patch("absent")
            .compose()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_compose_cli_overrides() {
        let mut named = NamedInputs::default();
        named.insert("model.lr", "0.5");
        named.insert("name", "from-flag");
        named.insert("unknown", "ignored");
        let sources = Sources::new()
            .with_conf(yaml("model: {lr: 0.1, depth: 3}\nname: base\n"))
            .with_inputs(Arc::new(named));

        // Disabled unless asked for
        let tree = sources.clone().compose().unwrap();
        assert_eq!(tree.lookup("model.lr").unwrap(), Some(&Value::Float(0.1)));

        let tree = sources.with_cli_overrides(true).compose().unwrap();
        assert_eq!(
            tree,
            yaml("model: {lr: 0.5, depth: 3}\nname: from-flag\n")
        );
    }

    #[test]
    fn test_compose_rejects_non_mapping_conf() {
        let err = Sources::new()
            .with_conf(Value::from("scalar"))
            .compose()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }
}
