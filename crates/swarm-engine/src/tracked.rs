//! The authoritative local view of the sync folder, guarded so that the
//! watcher-event processor and the inbound dispatcher never race on the
//! same relative path.
//!
//! A keyed mutex (hash of relpath) is sufficient to serialize per-path
//! writers; readers of the whole map take a short, synchronous lock.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use swarm_core::TrackedFile;
use tokio::sync::Mutex as AsyncMutex;

const SHARD_COUNT: usize = 32;

/// The tracked-file map plus a shard of per-path async locks callers hold
/// across the I/O and network round trips that make up one mutation.
pub struct TrackedMap {
    files: SyncMutex<HashMap<String, TrackedFile>>,
    shards: Vec<AsyncMutex<()>>,
}

impl Default for TrackedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: SyncMutex::new(HashMap::new()),
            shards: (0..SHARD_COUNT).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    fn shard_index(path_key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path_key.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    /// Hold this for the duration of a read-modify-write against
    /// `path_key` that spans awaits (disk I/O, network sends).
    pub async fn lock_path(&self, path_key: &str) -> tokio::sync::MutexGuard<'_, ()> {
        self.shards[Self::shard_index(path_key)].lock().await
    }

    pub fn get(&self, path_key: &str) -> Option<TrackedFile> {
        self.files.lock().get(path_key).cloned()
    }

    pub fn insert(&self, file: TrackedFile) {
        self.files.lock().insert(file.path_key(), file);
    }

    pub fn remove(&self, path_key: &str) -> Option<TrackedFile> {
        self.files.lock().remove(path_key)
    }

    pub fn snapshot(&self) -> Vec<TrackedFile> {
        self.files.lock().values().cloned().collect()
    }

    /// Replace the whole map, e.g. after a full rescan. Returns the
    /// previous contents so the caller can diff for local changes made
    /// while the watcher wasn't running.
    pub fn replace_all(&self, files: Vec<TrackedFile>) -> HashMap<String, TrackedFile> {
        let mut guard = self.files.lock();
        let previous = std::mem::take(&mut *guard);
        *guard = files.into_iter().map(|f| (f.path_key(), f)).collect();
        previous
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swarm_core::PeerId;

    fn file(relative_path: &str) -> TrackedFile {
        TrackedFile {
            relative_path: relative_path.to_string(),
            content_hash: "abc".to_string(),
            size: 3,
            last_modified: Utc::now(),
            is_directory: false,
            origin: PeerId::from_public_key(b"local"),
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let map = TrackedMap::new();
        map.insert(file("Docs/Notes.TXT"));
        assert!(map.get("docs/notes.txt").is_some());
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn per_path_lock_serializes_same_key() {
        let map = TrackedMap::new();
        let _guard = map.lock_path("docs/a.txt").await;

        let same_key_result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            map.lock_path("docs/a.txt"),
        )
        .await;
        assert!(same_key_result.is_err(), "second lock on same key should block");
    }
}
