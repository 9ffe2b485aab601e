//! Incremental cache
//!
//! One entry per source file, keyed by its path. An entry holds the content
//! fingerprint at the last scan, the raw import list, and (for modules and
//! submodules) the resolved closure. An entry whose fingerprint no longer
//! matches its source is ignored and replaced.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::BuildResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Entry format version, bumped whenever the layout changes
pub const CACHE_VERSION: u32 = 1;

/// Cached analysis of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry format version
    pub version: u32,
    /// Source path this entry describes
    pub key: PathBuf,
    /// Fingerprint of the source when the entry was written
    pub fingerprint: String,
    /// Raw imports in first-seen order
    pub imports: Vec<String>,
    /// Resolved closure; `None` until resolution succeeds
    #[serde(default)]
    pub closure: Option<Vec<String>>,
}

impl CacheEntry {
    /// Create an entry without a closure
    pub fn new(key: impl Into<PathBuf>, fingerprint: impl Into<String>, imports: Vec<String>) -> Self {
        Self {
            version: CACHE_VERSION,
            key: key.into(),
            fingerprint: fingerprint.into(),
            imports,
            closure: None,
        }
    }

    /// Attach a resolved closure
    pub fn with_closure(mut self, closure: Vec<String>) -> Self {
        self.closure = Some(closure);
        self
    }

    /// Whether this entry still describes a source with `fingerprint`
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.version == CACHE_VERSION && self.fingerprint == fingerprint
    }
}

/// Storage for cache entries
///
/// Loading never fails: an unreadable entry is a miss.
pub trait CacheStore: Send {
    /// Entry for `key`, if present and readable
    fn load(&self, key: &Path) -> Option<CacheEntry>;

    /// Insert or replace the entry for `entry.key`
    fn store(&mut self, entry: CacheEntry) -> BuildResult<()>;

    /// Drop the entry for `key`
    fn remove(&mut self, key: &Path) -> BuildResult<()>;

    /// Keys of all stored entries
    fn keys(&self) -> Vec<PathBuf>;
}

/// Remove entries whose source file is no longer part of the catalog
///
/// Returns the number of entries removed.
pub fn prune_orphans(store: &mut dyn CacheStore, live: &BTreeSet<PathBuf>) -> usize {
    let mut removed = 0;
    for key in store.keys() {
        if live.contains(&key) {
            continue;
        }
        match store.remove(&key) {
            Ok(()) => {
                tracing::debug!(path = %key.display(), "pruned orphaned cache entry");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %key.display(), "failed to prune cache entry: {}", e),
        }
    }
    removed
}
