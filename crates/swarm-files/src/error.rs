//! Error taxonomy for delta computation/application and the versioning
//! store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("delta instruction references block {index}, but base file has only {available} blocks")]
    BlockOutOfRange { index: u32, available: u32 },
}

pub type DeltaResult<T> = Result<T, DeltaError>;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("version index corrupt: {0}")]
    IndexCorrupt(#[from] serde_json::Error),

    #[error("version {0} not found")]
    NotFound(String),
}

pub type VersionResult<T> = Result<T, VersionError>;
