//! HKDF-SHA256 session key derivation.

use crate::aead::{KEY_SIZE, SessionKey};
use hkdf::Hkdf;
use sha2::Sha256;

const SESSION_KEY_INFO: &[u8] = b"swarm-sync-session-key-v1";

/// Derive a 32-byte symmetric session key from a raw ECDH shared secret.
///
/// Both ends of a handshake MUST see the same byte string regardless of
/// which side is the initiator, so the two ephemeral public keys are sorted
/// lexicographically before being folded into the HKDF `info` parameter.
/// This binds the derived key to the specific key pair without depending on
/// handshake role.
#[must_use]
pub fn derive_session_key(
    shared_secret: &[u8],
    local_pub: &[u8],
    remote_pub: &[u8],
) -> SessionKey {
    let (first, second) = if local_pub <= remote_pub {
        (local_pub, remote_pub)
    } else {
        (remote_pub, local_pub)
    };

    let mut info = Vec::with_capacity(SESSION_KEY_INFO.len() + first.len() + second.len());
    info.extend_from_slice(SESSION_KEY_INFO);
    info.extend_from_slice(first);
    info.extend_from_slice(second);

    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = [0u8; KEY_SIZE];
    hk.expand(&info, &mut out)
        .expect("32 bytes is within HKDF-SHA256's max output length");

    SessionKey::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_order_independent() {
        let secret = [0x42u8; 32];
        let a = [0x01u8; 33];
        let b = [0x02u8; 33];

        let k1 = derive_session_key(&secret, &a, &b);
        let k2 = derive_session_key(&secret, &b, &a);

        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn derivation_is_deterministic() {
        let secret = [0x42u8; 32];
        let a = [0x01u8; 33];
        let b = [0x02u8; 33];

        let k1 = derive_session_key(&secret, &a, &b);
        let k2 = derive_session_key(&secret, &a, &b);

        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_secrets_diverge() {
        let a = [0x01u8; 33];
        let b = [0x02u8; 33];

        let k1 = derive_session_key(&[0x01u8; 32], &a, &b);
        let k2 = derive_session_key(&[0x02u8; 32], &a, &b);

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
