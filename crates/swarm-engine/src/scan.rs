//! Startup scan: populate the tracked-file map from disk, consulting the
//! rehash-skip cache where possible.

use crate::error::{SyncError, SyncResult};
use crate::state::{IgnoreRules, TrackedCache};
use crate::tracked::TrackedMap;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use swarm_core::{PeerId, TrackedFile};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

/// Ensure `sync_root` exists, walk it excluding ignored names, and
/// populate `tracked` with one entry per file and directory found.
/// `cache` is consulted (and updated in place) to skip rehashing files
/// whose size and modification time are unchanged.
pub fn scan_sync_folder(
    sync_root: &Path,
    ignore_rules: &IgnoreRules,
    cache: &mut TrackedCache,
    tracked: &TrackedMap,
    local_peer: &PeerId,
) -> SyncResult<()> {
    if !sync_root.exists() {
        std::fs::create_dir_all(sync_root)
            .map_err(|_| SyncError::SyncFolderUnavailable(sync_root.to_path_buf()))?;
    }

    let walker = WalkBuilder::new(sync_root)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .git_global(false)
        .parents(false)
        .standard_filters(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "skipping unreadable directory entry during scan");
                continue;
            }
        };

        let abs_path = entry.path();
        if abs_path == sync_root {
            continue;
        }
        let relative_path = match abs_path.strip_prefix(sync_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        if ignore_rules.is_ignored(sync_root, relative_path, is_dir) {
            continue;
        }

        let relative_path_str = normalize_relative_path(relative_path);

        if is_dir {
            tracked.insert(TrackedFile {
                relative_path: relative_path_str,
                content_hash: String::new(),
                size: 0,
                last_modified: Utc::now(),
                is_directory: true,
                origin: local_peer.clone(),
            });
            continue;
        }

        let metadata = match std::fs::metadata(abs_path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %abs_path.display(), %err, "skipping unreadable file during scan");
                continue;
            }
        };
        let size = metadata.len();
        let last_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let path_key = relative_path_str.to_lowercase();
        let content_hash = match cache.lookup(&path_key, size, last_modified) {
            Some(hash) => hash.to_string(),
            None => {
                let hash = hash_file(abs_path)?;
                cache.update(path_key, hash.clone(), size, last_modified);
                hash
            }
        };

        tracked.insert(TrackedFile {
            relative_path: relative_path_str,
            content_hash,
            size,
            last_modified,
            is_directory: false,
            origin: local_peer.clone(),
        });
    }

    Ok(())
}

/// Forward-slash-joins path components and NFC-normalizes each one, per
/// the §3 data model's `TrackedFile.relative_path` contract — macOS's HFS+/
/// APFS decompose combining characters into NFD on disk, so without this a
/// file created on macOS and one created on Linux with the same visible
/// name would key differently in `tracked`.
pub(crate) fn normalize_relative_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().nfc().collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn hash_file(path: &Path) -> SyncResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash of an in-memory payload, used to validate a received
/// `FileChanged`'s bytes against its declared `content_hash` before the
/// write ever reaches disk.
pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Settings;
    use tempfile::tempdir;

    #[test]
    fn scan_populates_tracked_map_for_files_and_dirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();

        let settings = Settings::default();
        let ignore_rules = IgnoreRules::load(dir.path(), settings.excluded_subtrees.clone());
        let mut cache = TrackedCache::default();
        let tracked = TrackedMap::new();
        let local_peer = PeerId::from_public_key(b"local");

        scan_sync_folder(dir.path(), &ignore_rules, &mut cache, &tracked, &local_peer).unwrap();

        assert!(tracked.get("docs").is_some());
        let file = tracked.get("docs/a.txt").unwrap();
        assert_eq!(file.size, 5);
        assert!(tracked.get(".ds_store").is_none());
    }

    #[test]
    fn scan_reuses_cached_hash_when_metadata_unchanged() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let ignore_rules = IgnoreRules::load(dir.path(), Vec::new());
        let local_peer = PeerId::from_public_key(b"local");

        let mut cache = TrackedCache::default();
        let tracked = TrackedMap::new();
        scan_sync_folder(dir.path(), &ignore_rules, &mut cache, &tracked, &local_peer).unwrap();
        let first_hash = tracked.get("a.txt").unwrap().content_hash;

        cache.update("a.txt".to_string(), "stale-but-trusted".to_string(), 5, {
            let metadata = std::fs::metadata(dir.path().join("a.txt")).unwrap();
            DateTime::<Utc>::from(metadata.modified().unwrap())
        });

        let tracked2 = TrackedMap::new();
        scan_sync_folder(dir.path(), &ignore_rules, &mut cache, &tracked2, &local_peer).unwrap();
        assert_eq!(tracked2.get("a.txt").unwrap().content_hash, "stale-but-trusted");
        assert_ne!(first_hash, "stale-but-trusted");
    }
}
