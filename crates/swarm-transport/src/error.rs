//! Error taxonomy for framing, handshake, and connection-pool failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("peer rejected handshake: {0}")]
    HandshakeRejected(String),

    #[error("frame exceeds maximum size ({size} > {max})")]
    InvalidFrame { size: u32, max: u32 },

    #[error("channel closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Crypto(#[from] swarm_crypto::CryptoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
