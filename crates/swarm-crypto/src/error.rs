//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors surfaced by identity, key-exchange, and AEAD operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed public key bytes")]
    InvalidPublicKey,

    #[error("malformed signature bytes")]
    InvalidSignature,

    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("AEAD decryption failed")]
    DecryptionFailed,

    #[error("record too short to contain a nonce and tag")]
    RecordTooShort,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
