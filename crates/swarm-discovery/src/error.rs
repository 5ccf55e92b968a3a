//! Error taxonomy for broadcast binding and presence-message handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind UDP socket: {0}")]
    BindFailed(std::io::Error),

    #[error("send failed: {0}")]
    SendFailed(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
