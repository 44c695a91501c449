//! Error types for bindconf
//!
//! Errors are structured: a kind, the config path that was being resolved,
//! an optional cause and an actionable help message.

use std::fmt;

/// Result type alias for bindconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bindconf operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Key path where the error occurred (e.g., "model.encoder")
    pub path: Option<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// No store is active
    #[error("Configuration not initialized")]
    UninitializedConfig,
    /// Key missing and no default supplied
    #[error("Key not found")]
    KeyNotFound,
    /// Malformed key path, or an intermediate segment is not a mapping
    #[error("Invalid key path")]
    InvalidPath,
    /// Self-referential `${...}` chain or re-entrant construction
    #[error("Interpolation cycle detected")]
    InterpolationCycle,
    /// External dotted name could not be resolved
    #[error("Cannot resolve reference '@{name}'")]
    ReferenceResolution { name: String },
    /// Declared type cast failed
    #[error("Type coercion failed")]
    TypeCoercion,
    /// Caller arguments do not fit the target's parameter list
    #[error("Cannot bind arguments for '{target}'")]
    BindingSignature { target: String },
    /// A validation check failed
    #[error("Validation error")]
    Validation,
    /// Error parsing YAML/JSON or a malformed source tree
    #[error("Parse error")]
    Parse,
    /// I/O error (file not found, unwritable output, ...)
    #[error("I/O error")]
    Io,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            help: None,
            cause: None,
        }
    }

    /// Create an uninitialized config error
    pub fn uninitialized() -> Self {
        Self::new(ErrorKind::UninitializedConfig)
            .with_help("Call bindconf::init(...) or enter a scoped store first")
    }

    /// Create a key not found error
    pub fn key_not_found(path: impl Into<String>) -> Self {
        let path_str = path.into();
        Self {
            help: Some(format!(
                "Check that '{}' exists in the configuration or pass a default",
                path_str
            )),
            path: Some(path_str),
            ..Self::new(ErrorKind::KeyNotFound)
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            cause: Some(reason.into()),
            ..Self::new(ErrorKind::InvalidPath)
        }
    }

    /// Create an interpolation cycle error
    pub fn interpolation_cycle(path: impl Into<String>, chain: Vec<String>) -> Self {
        let chain_str = chain.join(" → ");
        Self {
            path: Some(path.into()),
            help: Some("Break the cycle by removing one of the references".into()),
            cause: Some(format!("Chain: {}", chain_str)),
            ..Self::new(ErrorKind::InterpolationCycle)
        }
    }

    /// Create a reference resolution error
    pub fn reference(name: impl Into<String>, message: impl Into<String>) -> Self {
        let n = name.into();
        Self {
            help: Some(format!(
                "Register '{}' with the object resolver or check for typos",
                n
            )),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::ReferenceResolution { name: n })
        }
    }

    /// Create a type coercion error
    pub fn type_coercion(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            help: Some(format!(
                "Ensure the value can be converted to {}",
                expected.into()
            )),
            cause: Some(format!("Got: {}", got.into())),
            ..Self::new(ErrorKind::TypeCoercion)
        }
    }

    /// Create a binding signature error
    pub fn binding(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::BindingSignature {
                target: target.into(),
            })
        }
    }

    /// Create a validation error
    pub fn validation(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            help: Some(format!("Validation check '{}' rejected the configuration", check.into())),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Validation)
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create an I/O error for a file
    pub fn io(file: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self {
            cause: Some(format!("{}: {}", file, err)),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Create a file not found error
    pub fn file_not_found(file: impl fmt::Display) -> Self {
        Self {
            cause: Some(format!("File not found: {}", file)),
            help: Some("Check that the file exists relative to the configuration directory".into()),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add path context only if none is set yet
    pub fn or_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}
