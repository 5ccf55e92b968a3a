//! Cryptographic primitives for `swarm-sync`: long-lived identity signing,
//! per-session ECDH, HKDF-SHA256 key derivation, and AES-256-GCM AEAD
//! framing.

pub mod aead;
pub mod error;
pub mod kdf;
pub mod signing;

pub use aead::SessionKey;
pub use error::{CryptoError, CryptoResult};
pub use kdf::derive_session_key;
pub use signing::{EphemeralKeypair, IdentityKeypair, fingerprint, short_fingerprint, verify};
