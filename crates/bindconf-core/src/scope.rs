//! Construction scopes and resolution bookkeeping
//!
//! While a construction reference runs its factory, the `K/param` siblings of
//! `K` are visible under the bare name `param`. Each construction pushes one
//! frame and only the top frame is consulted, so overrides never leak into
//! sibling or nested constructions. Pushes return guards that pop on drop,
//! which keeps the stack balanced on early returns and panics.

use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::resolved::Resolved;

/// Overrides visible during one construction, keyed by bare parameter name
pub type Frame = IndexMap<String, Resolved>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stack of construction frames
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Mutex<Vec<Frame>>,
}

impl ScopeStack {
    /// Push a frame for the duration of the returned guard
    pub fn push(&self, frame: Frame) -> FrameGuard<'_> {
        let mut frames = lock(&self.frames);
        frames.push(frame);
        FrameGuard {
            stack: self,
            depth: frames.len(),
        }
    }

    /// Look up a bare name in the top frame
    pub fn lookup(&self, name: &str) -> Option<Resolved> {
        lock(&self.frames).last().and_then(|frame| frame.get(name).cloned())
    }

    /// Number of active construction frames
    pub fn depth(&self) -> usize {
        lock(&self.frames).len()
    }
}

/// Pops its frame when dropped
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'a> {
    stack: &'a ScopeStack,
    depth: usize,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut frames = lock(&self.stack.frames);
        frames.truncate(self.depth.saturating_sub(1));
    }
}

/// Set of keys whose resolution is currently on the call stack
#[derive(Debug, Default)]
pub struct InProgress {
    label: &'static str,
    paths: Mutex<Vec<String>>,
}

impl InProgress {
    /// Create a tracker; `label` is only used in error messages
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Mark `path` as in progress, failing if it already is
    pub fn enter(&self, path: &str) -> Result<PathGuard<'_>> {
        let mut paths = lock(&self.paths);
        if paths.iter().any(|p| p == path) {
            let mut chain = paths.clone();
            chain.push(path.to_string());
            return Err(Error::interpolation_cycle(path, chain)
                .with_help(format!("'{}' is already being {}", path, self.label)));
        }
        paths.push(path.to_string());
        Ok(PathGuard {
            tracker: self,
            depth: paths.len(),
        })
    }

    #[cfg(test)]
    fn contains(&self, path: &str) -> bool {
        lock(&self.paths).iter().any(|p| p == path)
    }
}

/// Removes its path from the tracker when dropped
#[must_use = "the path leaves the in-progress set as soon as the guard is dropped"]
pub struct PathGuard<'a> {
    tracker: &'a InProgress,
    depth: usize,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut paths = lock(&self.tracker.paths);
        paths.truncate(self.depth.saturating_sub(1));
    }
}
