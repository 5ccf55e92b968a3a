//! Loads or generates this installation's long-lived identity.

use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use swarm_crypto::IdentityKeypair;
use tracing::info;

const KEY_FILE: &str = "identity.key";
const PUB_FILE: &str = "identity.pub";

pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the persisted identity, generating and persisting a fresh one
    /// on first run.
    pub fn load_or_generate(&self) -> ConfigResult<IdentityKeypair> {
        let key_path = self.dir.join(KEY_FILE);
        if key_path.exists() {
            let bytes = std::fs::read(&key_path)?;
            return IdentityKeypair::from_bytes(&bytes).map_err(ConfigError::IdentityCorrupt);
        }

        std::fs::create_dir_all(&self.dir)?;
        let identity = IdentityKeypair::generate();
        self.persist(&identity)?;
        info!(dir = %self.dir.display(), "generated new identity");
        Ok(identity)
    }

    fn persist(&self, identity: &IdentityKeypair) -> ConfigResult<()> {
        let key_path = self.dir.join(KEY_FILE);
        let pub_path = self.dir.join(PUB_FILE);

        std::fs::write(&key_path, identity.to_bytes())?;
        restrict_permissions(&key_path)?;
        std::fs::write(&pub_path, identity.public_key_bytes())?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> ConfigResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> ConfigResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_on_first_run() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        let first = store.load_or_generate().unwrap();
        assert!(dir.path().join(KEY_FILE).exists());
        assert!(dir.path().join(PUB_FILE).exists());

        let second = store.load_or_generate().unwrap();
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
    }

    #[test]
    #[cfg(unix)]
    fn key_file_has_restricted_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.load_or_generate().unwrap();

        let mode = std::fs::metadata(dir.path().join(KEY_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
