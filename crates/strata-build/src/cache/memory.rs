//! In-memory cache store, used for `--no-cache` builds and tests

use super::{CacheEntry, CacheStore};
use crate::error::BuildResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cache store that lives only as long as the process
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &Path) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    fn store(&mut self, entry: CacheEntry) -> BuildResult<()> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, key: &Path) -> BuildResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}
