//! Persisted, flat-file installation state: identity, settings, the
//! rehash-skip cache, and ignore rules. No database engine sits behind
//! any of this — each concern gets its own file under a platform config
//! directory, resolved with the `directories` crate.

mod cache;
mod identity;
mod ignore_rules;
mod settings;

pub use cache::{CachedEntry, TrackedCache};
pub use identity::IdentityStore;
pub use ignore_rules::IgnoreRules;
pub use settings::{Settings, SettingsStore, TrustedPeerInfo, VersioningConfig};

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use std::path::PathBuf;
use swarm_crypto::IdentityKeypair;

const QUALIFIER: &str = "net";
const ORGANIZATION: &str = "swarm-sync";
const APPLICATION: &str = "swarm-sync";

/// The installation's config directory, plus everything loaded from it.
pub struct InstallState {
    pub config_dir: PathBuf,
    pub identity: IdentityKeypair,
    pub settings: Settings,
    pub settings_store: SettingsStore,
}

impl InstallState {
    /// Resolve the platform config directory, then load or generate the
    /// identity and settings that live under it.
    pub fn load(config_dir_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_dir = match config_dir_override {
            Some(dir) => dir,
            None => ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
                .ok_or(ConfigError::NoConfigDir)?
                .config_dir()
                .to_path_buf(),
        };

        std::fs::create_dir_all(&config_dir)?;

        let identity = IdentityStore::new(&config_dir).load_or_generate()?;
        let settings_store = SettingsStore::new(&config_dir);
        let settings = settings_store.load()?;

        Ok(Self { config_dir, identity, settings, settings_store })
    }

    pub fn save_settings(&self) -> ConfigResult<()> {
        self.settings_store.save(&self.settings)
    }
}

/// Build the ignore-rule set for the current sync folder and settings.
#[must_use]
pub fn ignore_rules_for(settings: &Settings) -> IgnoreRules {
    IgnoreRules::load(&settings.sync_folder, settings.excluded_subtrees.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_creates_identity_and_default_settings() {
        let dir = tempdir().unwrap();
        let state = InstallState::load(Some(dir.path().to_path_buf())).unwrap();

        assert!(dir.path().join("identity.key").exists());
        assert_eq!(state.settings.conflict_mode, crate::conflict::ConflictMode::AutoNewest);
    }

    #[test]
    fn reload_reuses_persisted_identity() {
        let dir = tempdir().unwrap();
        let first = InstallState::load(Some(dir.path().to_path_buf())).unwrap();
        let second = InstallState::load(Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(first.identity.public_key_bytes(), second.identity.public_key_bytes());
    }
}
