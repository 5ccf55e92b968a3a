//! AES-256-GCM sealing for session-encrypted records.
//!
//! A record is `nonce (12 B) || ciphertext || tag (16 B)`. Nonces are drawn
//! fresh from the system RNG on every seal; the 96-bit nonce space is large
//! enough that per-session reuse is not a practical concern at the message
//! volumes this protocol handles.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand_core::RngCore;
use zeroize::ZeroizeOnDrop;

/// Nonce size in bytes (96-bit GCM nonce).
pub const NONCE_SIZE: usize = 12;
/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;
/// Raw key size in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit AEAD session key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Seal `plaintext`, returning `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if the underlying AEAD
    /// operation fails (should not happen for well-formed inputs).
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        AeadOsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut out = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut record = Vec::with_capacity(NONCE_SIZE + out.len());
        record.extend_from_slice(&nonce_bytes);
        record.append(&mut out);
        Ok(record)
    }

    /// Open a record produced by [`SessionKey::seal`].
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::RecordTooShort` if `record` cannot contain a
    /// nonce and tag, or `CryptoError::DecryptionFailed` on tag mismatch.
    pub fn open(&self, record: &[u8]) -> CryptoResult<Vec<u8>> {
        if record.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::RecordTooShort);
        }
        let (nonce_bytes, ciphertext) = record.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// AEAD round-trip — any plaintext survives seal/open
        /// under the same key, and flipping any single byte of the sealed
        /// record causes `open` to fail.
        #[test]
        fn aead_roundtrip_and_tamper(
            key_bytes in prop::array::uniform32(any::<u8>()),
            plaintext in prop::collection::vec(any::<u8>(), 0..1024),
            flip_idx in 0usize..1024,
        ) {
            let key = SessionKey::new(key_bytes);
            let record = key.seal(&plaintext).unwrap();
            prop_assert_eq!(key.open(&record).unwrap(), plaintext);

            let idx = flip_idx % record.len();
            let mut tampered = record.clone();
            tampered[idx] ^= 0x01;
            prop_assert!(key.open(&tampered).is_err());
        }
    }
}
