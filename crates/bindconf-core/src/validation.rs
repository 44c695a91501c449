//! Validation checks run when a store becomes active
//!
//! A validation is a single named check, an ordered sequence of validations,
//! or a named group whose checks all run. Check bodies belong to the caller;
//! they usually read the active store through the free functions.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};

/// Body of a validation check
pub type Check = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// What to validate, and in which order
#[derive(Clone)]
pub enum Validation {
    /// One check
    Check { name: String, check: Check },
    /// Validations run in order; the first failure stops the run
    Sequence(Vec<Validation>),
    /// A named collection, like the checks of one module
    Named { group: String, checks: Vec<Validation> },
}

impl Validation {
    /// A single named check
    pub fn check<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Validation::Check {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Validations run in order
    pub fn sequence(items: impl IntoIterator<Item = Validation>) -> Self {
        Validation::Sequence(items.into_iter().collect())
    }

    /// A group of checks reported as `group.name`
    pub fn named(group: impl Into<String>, checks: impl IntoIterator<Item = Validation>) -> Self {
        Validation::Named {
            group: group.into(),
            checks: checks.into_iter().collect(),
        }
    }

    /// Run every check, stopping at the first failure
    pub fn run(&self) -> Result<()> {
        self.run_in(None)
    }

    fn run_in(&self, group: Option<&str>) -> Result<()> {
        match self {
            Validation::Check { name, check } => {
                let full_name = match group {
                    Some(group) => format!("{}.{}", group, name),
                    None => name.clone(),
                };
                log::debug!("Validating {}", full_name);
                check().map_err(|e| match e.kind {
                    ErrorKind::Validation => e,
                    _ => Error::validation(&full_name, e.to_string()),
                })
            }
            Validation::Sequence(items) => items.iter().try_for_each(|item| item.run_in(group)),
            Validation::Named { group: name, checks } => {
                let full_group = match group {
                    Some(group) => format!("{}.{}", group, name),
                    None => name.clone(),
                };
                checks
                    .iter()
                    .try_for_each(|check| check.run_in(Some(&full_group)))
            }
        }
    }
}

impl From<Vec<Validation>> for Validation {
    fn from(items: Vec<Validation>) -> Self {
        Validation::Sequence(items)
    }
}

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Check { name, .. } => f.debug_tuple("Check").field(name).finish(),
            Validation::Sequence(items) => f.debug_tuple("Sequence").field(items).finish(),
            Validation::Named { group, checks } => f
                .debug_struct("Named")
                .field("group", group)
                .field("checks", checks)
                .finish(),
        }
    }
}
