//! Error taxonomy for the sync engine and its persisted state.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] swarm_transport::TransportError),

    #[error(transparent)]
    Wire(#[from] swarm_core::wire::WireError),

    #[error(transparent)]
    Delta(#[from] swarm_files::DeltaError),

    #[error(transparent)]
    Version(#[from] swarm_files::VersionError),

    #[error(transparent)]
    Watch(#[from] swarm_watch::WatchError),

    #[error(transparent)]
    Discovery(#[from] swarm_discovery::DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync folder {0} does not exist and could not be created")]
    SyncFolderUnavailable(PathBuf),

    #[error("peer {0} is not trusted; message dropped")]
    UntrustedPeer(swarm_core::PeerId),

    #[error("hash mismatch on received payload for {relative_path}")]
    HashMismatch { relative_path: String },

    #[error("local disk is full; aborting apply for {relative_path}")]
    DiskFull { relative_path: String },

    #[error("conflict could not be resolved automatically for {relative_path}")]
    FileConflictDetected { relative_path: String },
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("settings file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("identity key file is corrupt: {0}")]
    IdentityCorrupt(swarm_crypto::CryptoError),

    #[error("no usable config directory for this platform")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
