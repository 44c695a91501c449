//! bindconf CLI - inspect layered configurations from the command line
//!
//! Usage:
//!   bindconf dump --dir conf --patch gpu --resolve
//!   bindconf get --file conf.yaml trainer.lr
//!   bindconf check --dir conf --set trainer.epochs=3
//!   bindconf get --dir conf trainer.lr --cli-overrides -- --trainer.lr 0.5

use bindconf_core::inputs::parse_scalar;
use bindconf_core::types::parse_table;
use bindconf_core::{ArgvInputs, ErrorKind, Resolved, Sources, Store, StoreOptions, Value};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// bindconf - layered configuration with interpolation and injection
#[derive(Parser)]
#[command(name = "bindconf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the configuration comes from
#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Directory holding the base configuration and patches
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Name of the base configuration inside --dir
    #[arg(short, long)]
    base: Option<String>,

    /// Patch applied on top of the base, in order
    #[arg(short, long = "patch")]
    patches: Vec<String>,

    /// Configuration file merged in order
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// Override a key (dotted path, YAML value)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    sets: Vec<String>,

    /// Declare the type of a key (bool, int, float, str)
    #[arg(long = "type", value_name = "KEY=TYPE")]
    types: Vec<String>,

    /// Apply `-- --key value` flags onto existing leaves
    #[arg(long)]
    cli_overrides: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the composed configuration
    Dump {
        #[command(flatten)]
        sources: SourceArgs,

        /// Resolve markers instead of printing them raw
        #[arg(short, long)]
        resolve: bool,

        /// Leave a dotted key out of the output
        #[arg(short, long = "except")]
        except: Vec<String>,

        /// Output format: yaml, json
        #[arg(long, default_value = "yaml")]
        format: String,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Flags read when --cli-overrides is given
        #[arg(last = true)]
        flags: Vec<String>,
    },

    /// Get a single value
    Get {
        /// Dotted key (e.g., trainer.lr)
        key: String,

        #[command(flatten)]
        sources: SourceArgs,

        /// Print the stored value without resolving it
        #[arg(long)]
        raw: bool,

        /// Printed if the key is absent
        #[arg(long)]
        default: Option<String>,

        /// Output format: text, json, yaml
        #[arg(long, default_value = "text")]
        format: String,

        /// Flags read when --cli-overrides is given
        #[arg(last = true)]
        flags: Vec<String>,
    },

    /// Compose and resolve every key, reporting the first failure
    Check {
        #[command(flatten)]
        sources: SourceArgs,

        /// Flags read when --cli-overrides is given
        #[arg(last = true)]
        flags: Vec<String>,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    execute(Cli::parse())
}

fn execute(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::Dump {
            sources,
            resolve,
            except,
            format,
            output,
            flags,
        } => cmd_dump(&sources, &flags, resolve, &except, &format, output),

        Commands::Get {
            key,
            sources,
            raw,
            default,
            format,
            flags,
        } => cmd_get(&sources, &flags, &key, raw, default, &format),

        Commands::Check { sources, flags } => cmd_check(&sources, &flags),
    }
}

/// Parse `KEY=VALUE` into an override tree
fn parse_sets(sets: &[String]) -> Result<Value, String> {
    let mut overrides = Value::empty_mapping();
    for set in sets {
        let (key, raw) = set
            .split_once('=')
            .ok_or_else(|| format!("Invalid --set '{}': expected KEY=VALUE", set))?;
        overrides
            .set_path(key.trim(), parse_scalar(raw))
            .map_err(|e| format!("Invalid --set '{}': {}", set, e))?;
    }
    Ok(overrides)
}

fn build_sources(args: &SourceArgs, flags: &[String]) -> Result<Sources, String> {
    let mut sources = Sources::new();
    for file in &args.files {
        sources = sources.with_file(file);
    }
    if let Some(dir) = &args.dir {
        sources = sources.with_dir(dir);
    }
    if let Some(base) = &args.base {
        sources = sources.with_base(base);
    }
    for patch in &args.patches {
        sources = sources.with_patch(patch);
    }
    if !args.sets.is_empty() {
        sources = sources.with_overrides(parse_sets(&args.sets)?);
    }
    if args.cli_overrides {
        sources = sources
            .with_cli_overrides(true)
            .with_inputs(Arc::new(ArgvInputs::new(flags.iter())));
    }
    Ok(sources)
}

/// Parse `KEY=TYPE` declarations into a type table
fn parse_types(types: &[String]) -> Result<bindconf_core::TypeTable, String> {
    let pairs = types
        .iter()
        .map(|decl| {
            decl.split_once('=')
                .map(|(key, ty)| (key.trim(), ty.trim()))
                .ok_or_else(|| format!("Invalid --type '{}': expected KEY=TYPE", decl))
        })
        .collect::<Result<Vec<_>, String>>()?;
    parse_table(pairs).map_err(|e| format!("Invalid --type: {}", e))
}

fn load_store(args: &SourceArgs, flags: &[String]) -> Result<Store, String> {
    if args.dir.is_none() && args.files.is_empty() && args.sets.is_empty() {
        return Err("No configuration given: use --dir, --file or --set".to_string());
    }

    let sources = build_sources(args, flags)?;
    let tree = sources
        .compose()
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    let options = StoreOptions {
        types: parse_types(&args.types)?,
        conf_patches: sources.conf_patches.clone(),
        ..StoreOptions::default()
    };
    Ok(Store::with_options(tree, options))
}

fn render(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
        "yaml" => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        other => Err(format!("Unknown format '{}'", other)),
    }
}

fn cmd_dump(
    sources: &SourceArgs,
    flags: &[String],
    resolve: bool,
    except: &[String],
    format: &str,
    output: Option<PathBuf>,
) -> ExitCode {
    let store = match load_store(sources, flags) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let tree = if resolve {
        store.resolve_all().map(|r| r.to_value_lossy())
    } else {
        store.to_dict(&[])
    };
    let content = match tree
        .and_then(|t| t.stripped(except))
        .map_err(|e| e.to_string())
        .and_then(|t| render(&t, format))
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::from(1);
        }
    };

    if let Some(output_path) = output {
        if let Err(e) = std::fs::write(&output_path, &content) {
            eprintln!("{}: {}", "Error writing file".red(), e);
            return ExitCode::from(2);
        }
        eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
    } else {
        print!("{}", content);
    }
    ExitCode::SUCCESS
}

fn cmd_get(
    sources: &SourceArgs,
    flags: &[String],
    key: &str,
    raw: bool,
    default: Option<String>,
    format: &str,
) -> ExitCode {
    let store = match load_store(sources, flags) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let result = if raw {
        store.raw(key).map(Resolved::from)
    } else {
        store.get(key)
    };

    match result {
        Ok(value) => {
            let content = match (format, &value) {
                ("json" | "yaml", _) => render(&value.to_value_lossy(), format),
                (_, Resolved::Sequence(_) | Resolved::Mapping(_)) => {
                    render(&value.to_value_lossy(), "yaml")
                }
                (_, scalar) => Ok(format!("{}\n", scalar)),
            };
            match content {
                Ok(content) => {
                    print!("{}", content);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    ExitCode::from(1)
                }
            }
        }
        Err(e) if e.kind == ErrorKind::KeyNotFound && default.is_some() => {
            println!("{}", default.unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_check(sources: &SourceArgs, flags: &[String]) -> ExitCode {
    let store = match load_store(sources, flags) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return ExitCode::from(2);
        }
    };

    match store.resolve_all() {
        Ok(resolved) => {
            let count = resolved.as_mapping().map(|m| m.len()).unwrap_or_default();
            println!("{} {} top-level keys resolved", "✓".green(), count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn run_args(args: &[&str]) -> ExitCode {
        let mut argv = vec!["bindconf"];
        argv.extend_from_slice(args);
        execute(Cli::try_parse_from(argv).unwrap())
    }

    fn conf_file(dir: &Path, body: &str) -> String {
        let path = dir.join("conf.yaml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_get_parses_key_before_trailing_flags() {
        let cli = Cli::try_parse_from([
            "bindconf",
            "get",
            "--file",
            "c.yaml",
            "trainer.lr",
            "--cli-overrides",
            "--",
            "--trainer.lr",
            "0.5",
        ])
        .unwrap();

        match cli.command {
            Commands::Get {
                key,
                sources,
                flags,
                ..
            } => {
                assert_eq!(key, "trainer.lr");
                assert_eq!(sources.files, vec![PathBuf::from("c.yaml")]);
                assert!(sources.cli_overrides);
                assert_eq!(flags, vec!["--trainer.lr", "0.5"]);
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_get_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let file = conf_file(dir.path(), "trainer:\n  lr: 0.1\n  name: ${run}\nrun: exp\n");

        let get = |args: &[&str]| {
            let mut argv = vec!["get", "--file", file.as_str()];
            argv.extend_from_slice(args);
            run_args(&argv)
        };

        assert_eq!(get(&["trainer.lr"]), ExitCode::SUCCESS);
        assert_eq!(get(&["trainer"]), ExitCode::SUCCESS);
        assert_eq!(get(&["trainer.name", "--raw", "--format", "json"]), ExitCode::SUCCESS);
        assert_eq!(get(&["missing"]), ExitCode::from(1));
        assert_eq!(get(&["missing", "--default", "x"]), ExitCode::SUCCESS);
        assert_eq!(get(&["trainer.lr", "--format", "toml"]), ExitCode::from(1));
    }

    #[test]
    fn test_get_with_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = conf_file(dir.path(), "trainer: {lr: 0.1}\n");

        assert_eq!(
            run_args(&[
                "get",
                "--file",
                file.as_str(),
                "trainer.lr",
                "--cli-overrides",
                "--",
                "--trainer.lr",
                "0.5",
            ]),
            ExitCode::SUCCESS
        );
    }

    #[test]
    fn test_load_errors_exit_two() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        let missing = missing.to_string_lossy().into_owned();

        assert_eq!(run_args(&["check"]), ExitCode::from(2));
        assert_eq!(run_args(&["check", "--file", missing.as_str()]), ExitCode::from(2));
        assert_eq!(run_args(&["get", "--file", missing.as_str(), "a"]), ExitCode::from(2));
        assert_eq!(run_args(&["dump", "--file", missing.as_str()]), ExitCode::from(2));
    }

    #[test]
    fn test_check_reports_resolution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = conf_file(dir.path(), "a: 1\nb: ${a}\n");
        assert_eq!(run_args(&["check", "--file", good.as_str()]), ExitCode::SUCCESS);

        let bad = conf_file(dir.path(), "a: 1\nb: ${nowhere}\n");
        assert_eq!(run_args(&["check", "--file", bad.as_str()]), ExitCode::from(1));
    }

    #[test]
    fn test_dump_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = conf_file(dir.path(), "a: 1\nb: ${a}\nsecret: {token: t}\n");
        let out = dir.path().join("out.json");
        let out_str = out.to_string_lossy().into_owned();

        assert_eq!(
            run_args(&[
                "dump",
                "--file",
                file.as_str(),
                "--resolve",
                "--except",
                "secret.token",
                "--format",
                "json",
                "--output",
                out_str.as_str(),
            ]),
            ExitCode::SUCCESS
        );
        let written = std::fs::read_to_string(&out).unwrap();
        let written: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(written, yaml("a: 1\nb: 1\nsecret: {}\n"));

        assert_eq!(
            run_args(&["dump", "--file", file.as_str(), "--format", "toml"]),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_parse_sets() {
        let sets = vec![
            "trainer.lr=0.5".to_string(),
            "trainer.name=run 1".to_string(),
            "debug=true".to_string(),
        ];
        assert_eq!(
            parse_sets(&sets).unwrap(),
            yaml("trainer: {lr: 0.5, name: run 1}\ndebug: true\n")
        );
        assert!(parse_sets(&["novalue".to_string()]).is_err());
        assert!(parse_sets(&["a..b=1".to_string()]).is_err());
    }

    #[test]
    fn test_load_store_layers_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.yaml"), "lr: 0.1\nepochs: 2\n").unwrap();
        std::fs::write(dir.path().join("fast.yaml"), "epochs: 1\n").unwrap();

        let args = SourceArgs {
            dir: Some(dir.path().to_path_buf()),
            patches: vec!["fast".to_string()],
            sets: vec!["lr=0.5".to_string()],
            ..SourceArgs::default()
        };
        let store = load_store(&args, &[]).unwrap();

        assert_eq!(store.to_dict(&[]).unwrap(), yaml("lr: 0.5\nepochs: 1\n"));
        assert_eq!(store.conf_patches(), ["fast".to_string()]);
    }

    #[test]
    fn test_declared_types() {
        let args = SourceArgs {
            sets: vec!["epochs='3'".to_string()],
            types: vec!["epochs=int".to_string()],
            ..SourceArgs::default()
        };
        let store = load_store(&args, &[]).unwrap();
        assert_eq!(store.get("epochs").unwrap(), Resolved::Integer(3));

        let bad = SourceArgs {
            types: vec!["epochs=decimal".to_string()],
            ..args
        };
        assert!(load_store(&bad, &[]).is_err());
    }

    #[test]
    fn test_cli_overrides_apply_to_existing_leaves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.yaml"), "trainer: {lr: 0.1}\n").unwrap();

        let args = SourceArgs {
            dir: Some(dir.path().to_path_buf()),
            cli_overrides: true,
            ..SourceArgs::default()
        };
        let flags = vec!["--trainer.lr".to_string(), "0.3".to_string()];
        let store = load_store(&args, &flags).unwrap();
        assert_eq!(store.get("trainer.lr").unwrap(), Resolved::Float(0.3));
    }

    #[test]
    fn test_render_rejects_unknown_format() {
        assert!(render(&yaml("a: 1"), "toml").is_err());
        assert_eq!(render(&yaml("a: 1"), "json").unwrap(), "{\n  \"a\": 1\n}\n");
    }
}
