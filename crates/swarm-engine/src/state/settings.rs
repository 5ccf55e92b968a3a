//! `settings.json`: the human-editable persisted configuration (device
//! name, sync folder, trusted peers, conflict mode, versioning, excluded
//! subtrees, local identifier).

use crate::conflict::ConflictMode;
use crate::error::ConfigResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use swarm_core::PeerId;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    pub enabled: bool,
    pub max_versions_per_file: usize,
    pub max_age_days: u32,
    /// If true, a versioning-store write failure aborts the apply instead
    /// of proceeding with the overwrite.
    pub required: bool,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self { enabled: true, max_versions_per_file: 10, max_age_days: 30, required: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub device_name: String,
    pub sync_folder: PathBuf,
    pub download_path: Option<PathBuf>,
    /// identifier -> (name, public key)
    pub trusted_peers: HashMap<PeerId, TrustedPeerInfo>,
    pub conflict_mode: ConflictMode,
    pub versioning: VersioningConfig,
    pub excluded_subtrees: Vec<String>,
    pub local_identifier: Option<PeerId>,
    pub delta_threshold_bytes: u64,
    pub tombstone_grace_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedPeerInfo {
    pub name: String,
    pub public_key: Vec<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: hostname_guess(),
            sync_folder: PathBuf::from("."),
            download_path: None,
            trusted_peers: HashMap::new(),
            conflict_mode: ConflictMode::default(),
            versioning: VersioningConfig::default(),
            excluded_subtrees: Vec::new(),
            local_identifier: None,
            delta_threshold_bytes: 1024 * 1024,
            tombstone_grace_hours: 24,
        }
    }
}

fn hostname_guess() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "swarm-sync-host".to_string())
}

/// Loads and saves [`Settings`] under a config directory.
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults if no file exists yet.
    pub fn load(&self) -> ConfigResult<Settings> {
        let path = self.path();
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, settings: &Settings) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_string_pretty(settings)?;
        std::fs::write(self.path(), raw)?;
        Ok(())
    }

    pub fn trust_peer(&self, settings: &mut Settings, id: PeerId, name: String, public_key: Vec<u8>) -> ConfigResult<()> {
        settings.trusted_peers.insert(id, TrustedPeerInfo { name, public_key });
        self.save(settings)
    }

    pub fn untrust_peer(&self, settings: &mut Settings, id: &PeerId) -> ConfigResult<()> {
        settings.trusted_peers.remove(id);
        self.save(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_without_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let settings = store.load().unwrap();
        assert_eq!(settings.conflict_mode, ConflictMode::AutoNewest);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut settings = Settings::default();
        settings.device_name = "laptop".to_string();
        settings.conflict_mode = ConflictMode::KeepBoth;

        store.save(&settings).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.device_name, "laptop");
        assert_eq!(loaded.conflict_mode, ConflictMode::KeepBoth);
    }

    #[test]
    fn trust_and_untrust_peer_persist() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut settings = Settings::default();
        let id = PeerId::from_public_key(b"peer-x");

        store.trust_peer(&mut settings, id.clone(), "peer-x".to_string(), vec![1, 2, 3]).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.trusted_peers.contains_key(&id));

        store.untrust_peer(&mut settings, &id).unwrap();
        let loaded = store.load().unwrap();
        assert!(!loaded.trusted_peers.contains_key(&id));
    }
}
