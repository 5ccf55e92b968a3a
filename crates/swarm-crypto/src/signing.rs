//! Long-lived P-256 signing identity and per-session ECDH ephemeral keys.
//!
//! Two distinct key pairs are in play: a long-lived signing key pair that
//! anchors a peer's identifier across sessions (TOFU-bound, persisted), and
//! a fresh ECDH key pair generated for every session to provide forward
//! secrecy. Neither is reused for the other's purpose.

use crate::error::{CryptoError, CryptoResult};
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::PublicKey;
use rand_core::OsRng;
use zeroize::ZeroizeOnDrop;

/// A long-lived P-256 signing identity.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeypair {
    #[zeroize(skip)]
    verifying: VerifyingKey,
    signing: SigningKey,
}

impl IdentityKeypair {
    /// Generate a fresh signing key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    /// Reconstruct a key pair from its raw scalar bytes (as persisted in
    /// `identity.key`).
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let signing = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let verifying = *signing.verifying_key();
        Ok(Self { signing, verifying })
    }

    /// Raw scalar bytes suitable for persisting to `identity.key`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes().into()
    }

    /// Compressed SEC1 public key bytes (33 bytes), suitable for persisting
    /// to `identity.pub` and for embedding in discovery broadcasts.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Sign a message. Never fails: P-256 ECDSA signing over arbitrary bytes
    /// cannot fail for a valid key.
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing.sign(msg);
        sig.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public_key", &short_fingerprint(&self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Verify a signature against raw (SEC1-compressed) public key bytes.
///
/// Never panics. Malformed public keys or signatures simply yield `false`
/// rather than propagating a parse error.
#[must_use]
pub fn verify(msg: &[u8], signature: &[u8], pubkey: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(pubkey) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(msg, &sig).is_ok()
}

/// A fresh ECDH key pair for one session, providing forward secrecy.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public_bytes: Vec<u8>,
}

impl EphemeralKeypair {
    /// Generate a new ephemeral ECDH key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_bytes = secret.public_key().to_encoded_point(true).as_bytes().to_vec();
        Self {
            secret,
            public_bytes,
        }
    }

    /// Compressed SEC1 bytes of this side's ephemeral public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_bytes
    }

    /// Perform the Diffie-Hellman step against a peer's ephemeral public key,
    /// returning the raw (unhashed) shared secret. Callers MUST run this
    /// through [`crate::kdf::derive_session_key`] before using it as an AEAD
    /// key.
    pub fn agree(&self, remote_pub: &[u8]) -> CryptoResult<[u8; 32]> {
        let public = PublicKey::from_sec1_bytes(remote_pub).map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&public);
        let bytes = shared.raw_secret_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes.as_slice());
        Ok(out)
    }
}

/// Full lowercase hex fingerprint of a public key.
#[must_use]
pub fn fingerprint(pubkey: &[u8]) -> String {
    hex::encode(pubkey)
}

/// Short colon-separated fingerprint: the first 8 bytes, hex, e.g.
/// `"AB:CD:12:34:EF:00:11:22"`.
#[must_use]
pub fn short_fingerprint(pubkey: &[u8]) -> String {
    pubkey
        .iter()
        .take(8)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let id = IdentityKeypair::generate();
        let msg = b"swarm sync presence broadcast";
        let sig = id.sign(msg);
        assert!(verify(msg, &sig, &id.public_key_bytes()));
    }

    #[test]
    fn bit_flip_invalidates_signature() {
        let id = IdentityKeypair::generate();
        let msg = b"swarm sync presence broadcast";
        let sig = id.sign(msg);
        let mut tampered = msg.to_vec();
        tampered[0] ^= 0x01;
        assert!(!verify(&tampered, &sig, &id.public_key_bytes()));
    }

    #[test]
    fn verify_never_panics_on_garbage() {
        assert!(!verify(b"msg", b"not a signature", b"not a key"));
        assert!(!verify(b"msg", &[], &[]));
    }

    #[test]
    fn identity_bytes_roundtrip() {
        let id = IdentityKeypair::generate();
        let restored = IdentityKeypair::from_bytes(&id.to_bytes()).unwrap();
        assert_eq!(id.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn ecdh_agreement_matches() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();

        let secret_a = a.agree(b.public_key_bytes()).unwrap();
        let secret_b = b.agree(a.public_key_bytes()).unwrap();

        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn ecdh_rejects_garbage_pubkey() {
        let a = EphemeralKeypair::generate();
        assert!(a.agree(b"not a point").is_err());
    }

    #[test]
    fn short_fingerprint_format() {
        let pubkey = (0u8..16).collect::<Vec<_>>();
        let fp = short_fingerprint(&pubkey);
        assert_eq!(fp, "00:01:02:03:04:05:06:07");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Signature soundness — any message verifies against
        /// its own signature, and flipping a single bit anywhere in the
        /// message invalidates it.
        #[test]
        fn signature_soundness(msg in prop::collection::vec(any::<u8>(), 0..512), flip_idx in 0usize..512) {
            let id = IdentityKeypair::generate();
            let sig = id.sign(&msg);
            prop_assert!(verify(&msg, &sig, &id.public_key_bytes()));

            if !msg.is_empty() {
                let mut tampered = msg.clone();
                let idx = flip_idx % tampered.len();
                tampered[idx] ^= 0x01;
                prop_assert!(!verify(&tampered, &sig, &id.public_key_bytes()));
            }
        }

        /// ECDH agreement — fresh ephemeral pairs on both sides
        /// always derive the same raw shared secret, regardless of which side
        /// computed it.
        #[test]
        fn ecdh_agreement_is_symmetric(_seed in any::<u8>()) {
            let a = EphemeralKeypair::generate();
            let b = EphemeralKeypair::generate();
            let secret_a = a.agree(b.public_key_bytes()).unwrap();
            let secret_b = b.agree(a.public_key_bytes()).unwrap();
            prop_assert_eq!(secret_a, secret_b);
        }
    }
}
