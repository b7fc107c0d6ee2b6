use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    loaded_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    /// Bumped by every invalidation of a path; `clear` bumps `epoch` instead.
    generations: HashMap<PathBuf, u64>,
    epoch: u64,
}

impl CacheState {
    fn generation(&self, path: &Path) -> Generation {
        Generation {
            epoch: self.epoch,
            path: self.generations.get(path).copied().unwrap_or(0),
        }
    }
}

/// Snapshot taken before a file read. An insert carrying a snapshot older
/// than the path's current generation is dropped, so a read that raced a
/// write cannot cache the content the write replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    path: u64,
}

/// Short-lived read-through cache keyed by absolute path.
///
/// A zero TTL disables it.
#[derive(Debug)]
pub struct ReadCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call before reading `path` from disk and hand the result to `insert`.
    pub fn generation(&self, path: &Path) -> Generation {
        self.state().generation(path)
    }

    pub fn get(&self, path: &Path) -> Option<Value> {
        if !self.enabled() {
            return None;
        }
        let mut state = self.state();
        match state.entries.get(path) {
            Some(entry) if entry.loaded_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                state.entries.remove(path);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, path: &Path, value: &Value, seen: Generation) {
        if !self.enabled() {
            return;
        }
        let mut state = self.state();
        if state.generation(path) != seen {
            return;
        }
        state.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, path: &Path) {
        let mut state = self.state();
        state.entries.remove(path);
        *state.generations.entry(path.to_path_buf()).or_default() += 1;
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.generations.clear();
        state.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
