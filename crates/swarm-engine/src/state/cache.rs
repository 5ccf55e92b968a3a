//! `<sync_root>/.swarm-cache`: an optional snapshot of the tracked-file map
//! consulted at startup to skip rehashing unchanged files, stored as a flat
//! JSON file rather than a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CACHE_FILE: &str = ".swarm-cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub content_hash: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackedCache {
    /// Keyed by the case-insensitive path key, matching `TrackedFile::path_key`.
    entries: HashMap<String, CachedEntry>,
}

impl TrackedCache {
    pub fn load(sync_root: &Path) -> Self {
        let path = cache_path(sync_root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, sync_root: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string(self)?;
        std::fs::write(cache_path(sync_root), raw)
    }

    /// Returns the cached hash for `path_key` if `size`/`last_modified`
    /// still match, so the caller can skip rehashing.
    #[must_use]
    pub fn lookup(&self, path_key: &str, size: u64, last_modified: DateTime<Utc>) -> Option<&str> {
        self.entries.get(path_key).and_then(|entry| {
            (entry.size == size && entry.last_modified == last_modified)
                .then_some(entry.content_hash.as_str())
        })
    }

    pub fn update(&mut self, path_key: String, content_hash: String, size: u64, last_modified: DateTime<Utc>) {
        self.entries.insert(path_key, CachedEntry { content_hash, size, last_modified });
    }

    pub fn remove(&mut self, path_key: &str) {
        self.entries.remove(path_key);
    }
}

fn cache_path(sync_root: &Path) -> PathBuf {
    sync_root.join(CACHE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lookup_misses_on_size_change() {
        let mut cache = TrackedCache::default();
        let now = Utc::now();
        cache.update("docs/a.txt".to_string(), "hash1".to_string(), 10, now);

        assert_eq!(cache.lookup("docs/a.txt", 10, now), Some("hash1"));
        assert_eq!(cache.lookup("docs/a.txt", 11, now), None);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut cache = TrackedCache::default();
        let now = Utc::now();
        cache.update("docs/a.txt".to_string(), "hash1".to_string(), 10, now);
        cache.save(dir.path()).unwrap();

        let loaded = TrackedCache::load(dir.path());
        assert_eq!(loaded.lookup("docs/a.txt", 10, now), Some("hash1"));
    }

    #[test]
    fn missing_cache_file_yields_empty() {
        let dir = tempdir().unwrap();
        let cache = TrackedCache::load(dir.path());
        assert_eq!(cache.lookup("docs/a.txt", 10, Utc::now()), None);
    }
}
