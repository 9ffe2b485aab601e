//! On-disk cache store
//!
//! Entries live under `<root>/entries/<hh>/<hash>.json`, where `hash` is the
//! SHA-256 of the source path and `hh` its first two hex digits.

use super::{CacheEntry, CacheStore, CACHE_VERSION};
use crate::error::{BuildError, BuildResult};
use crate::fingerprint::compute_hash;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Content-addressed JSON entry store
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Store rooted at `root`; directories are created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join("entries")
    }

    /// File holding the entry for `key`
    pub fn entry_path(&self, key: &Path) -> PathBuf {
        let hash = compute_hash(key.to_string_lossy().as_bytes());
        self.entries_dir()
            .join(&hash[..2])
            .join(format!("{}.json", hash))
    }

    fn read_entry(path: &Path) -> Option<CacheEntry> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring corrupt cache entry: {}", e);
                None
            }
        }
    }
}

impl CacheStore for DiskStore {
    fn load(&self, key: &Path) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }

        let entry = Self::read_entry(&path)?;
        if entry.key != key {
            tracing::warn!(path = %path.display(), "cache entry belongs to another file, ignoring");
            return None;
        }
        if entry.version != CACHE_VERSION {
            tracing::debug!(path = %path.display(), version = entry.version, "stale cache format");
            return None;
        }
        Some(entry)
    }

    fn store(&mut self, entry: CacheEntry) -> BuildResult<()> {
        let path = self.entry_path(&entry.key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| BuildError::CacheError(format!("Failed to serialize entry: {}", e)))?;

        // Write then rename so readers never observe a half-written entry
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| BuildError::io(&path, e))?;
        Ok(())
    }

    fn remove(&mut self, key: &Path) -> BuildResult<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BuildError::io(&path, e)),
        }
    }

    fn keys(&self) -> Vec<PathBuf> {
        let dir = self.entries_dir();
        if !dir.exists() {
            return Vec::new();
        }

        let mut keys: Vec<PathBuf> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| Self::read_entry(e.path()))
            .map(|entry| entry.key)
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_through_disk() {
        let temp = TempDir::new().unwrap();
        let mut store = DiskStore::new(temp.path().join(".cache"));
        let key = PathBuf::from("/project/src/modules/grid.f90");

        let entry = CacheEntry::new(&key, "f00d", vec!["mesh".into()])
            .with_closure(vec!["mesh".into(), "kinds".into()]);
        store.store(entry.clone()).unwrap();

        assert_eq!(store.load(&key), Some(entry));
        assert_eq!(store.keys(), vec![key.clone()]);

        store.remove(&key).unwrap();
        assert_eq!(store.load(&key), None);
        // removing twice is fine
        store.remove(&key).unwrap();
    }

    #[test]
    fn test_entry_path_is_sharded() {
        let store = DiskStore::new("/cache");
        let path = store.entry_path(Path::new("src/main.f90"));
        let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        let file = path.file_stem().unwrap().to_str().unwrap();
        assert_eq!(shard.len(), 2);
        assert!(file.starts_with(shard));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path());
        let key = Path::new("src/main.f90");

        let path = store.entry_path(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(store.load(key), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_foreign_key_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let mut store = DiskStore::new(temp.path());
        let key = Path::new("src/a.f90");

        store
            .store(CacheEntry::new("src/other.f90", "1", Vec::new()))
            .unwrap();
        let other_path = store.entry_path(Path::new("src/other.f90"));
        let path = store.entry_path(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::copy(&other_path, &path).unwrap();

        assert_eq!(store.load(key), None);
    }
}
