//! Content-addressed local archive of replaced file revisions.
//!
//! Layout under the store root (`<sync_root>/.swarm-versions/`): one
//! subdirectory per original relative path (sanitized to a filesystem-safe
//! name), containing the archived byte copies plus a JSON `index.json`
//! recording [`VersionEntry`] metadata for that path.

use crate::error::VersionResult;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use swarm_core::{PeerId, VersionEntry, VersionReason};
use tracing::warn;

const INDEX_FILE: &str = "index.json";

/// Persists and retrieves prior revisions of tracked files.
pub struct VersioningStore {
    root: PathBuf,
    max_versions_per_file: usize,
    max_age_days: u32,
}

impl VersioningStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_versions_per_file: usize, max_age_days: u32) -> Self {
        Self { root: root.into(), max_versions_per_file, max_age_days }
    }

    /// Archive `current_bytes` as the prior revision of `relative_path`.
    pub fn create_version(
        &self,
        relative_path: &str,
        current_bytes: &[u8],
        reason: VersionReason,
        source_peer: Option<PeerId>,
    ) -> VersionResult<VersionEntry> {
        let dir = self.path_dir(relative_path);
        fs::create_dir_all(&dir)?;

        let version_id = Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();
        let content_hash = hex::encode(Sha256::digest(current_bytes));

        let entry = VersionEntry {
            original_path: relative_path.to_string(),
            version_id: version_id.clone(),
            created_at: Utc::now(),
            size: current_bytes.len() as u64,
            content_hash,
            reason,
            source_peer,
        };

        fs::write(dir.join(&version_id), current_bytes)?;

        let mut index = self.load_index(&dir)?;
        index.push(entry.clone());
        self.save_index(&dir, &index)?;

        Ok(entry)
    }

    /// Archived revisions of `relative_path`, newest first.
    pub fn list_versions(&self, relative_path: &str) -> VersionResult<Vec<VersionEntry>> {
        let dir = self.path_dir(relative_path);
        let mut index = self.load_index(&dir)?;
        index.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(index)
    }

    /// Copy the archived revision's bytes back to `target_path`.
    ///
    /// If `target_path` already holds content identical to the version
    /// being restored, no new version is recorded for the pre-restore
    /// state; otherwise the current content is archived first so the
    /// restore itself is reversible.
    pub fn restore(&self, entry: &VersionEntry, target_path: &Path) -> VersionResult<()> {
        let dir = self.path_dir(&entry.original_path);
        let version_bytes = fs::read(dir.join(&entry.version_id))?;

        if target_path.exists() {
            let current_bytes = fs::read(target_path)?;
            let current_hash = hex::encode(Sha256::digest(&current_bytes));
            if current_hash != entry.content_hash {
                self.create_version(
                    &entry.original_path,
                    &current_bytes,
                    VersionReason::BeforeSync,
                    None,
                )?;
            }
        }

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target_path, version_bytes)?;
        Ok(())
    }

    /// Enforce retention across every tracked path: keep at most
    /// `max_versions_per_file` most recent entries, and drop anything
    /// older than `max_age_days` (0 means keep forever).
    pub fn prune(&self) -> VersionResult<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            self.prune_dir(&entry.path())?;
        }
        Ok(())
    }

    fn prune_dir(&self, dir: &Path) -> VersionResult<()> {
        let mut index = self.load_index(dir)?;
        index.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let cutoff = (self.max_age_days > 0)
            .then(|| Utc::now() - chrono::Duration::days(i64::from(self.max_age_days)));

        let mut kept = Vec::new();
        for (i, entry) in index.into_iter().enumerate() {
            let too_old = cutoff.is_some_and(|cutoff| entry.created_at < cutoff);
            let over_limit = i >= self.max_versions_per_file;
            if too_old || over_limit {
                let path = dir.join(&entry.version_id);
                if let Err(err) = fs::remove_file(&path) {
                    warn!(?path, %err, "failed to remove pruned version file");
                }
            } else {
                kept.push(entry);
            }
        }
        self.save_index(dir, &kept)
    }

    fn path_dir(&self, relative_path: &str) -> PathBuf {
        self.root.join(sanitize(relative_path))
    }

    fn load_index(&self, dir: &Path) -> VersionResult<Vec<VersionEntry>> {
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&index_path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_index(&self, dir: &Path, index: &[VersionEntry]) -> VersionResult<()> {
        fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(index)?;
        fs::write(dir.join(INDEX_FILE), raw)?;
        Ok(())
    }
}

/// Map a relative path to a filesystem-safe directory name, collapsing path
/// separators so nested paths don't produce nested directories.
fn sanitize(relative_path: &str) -> String {
    relative_path
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}
