//! Peer identity: the stable identifier a host presents to the swarm, and
//! the persisted trust binding between that identifier and a public key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a [`PeerId`]'s opaque identifier, in characters.
pub const PEER_ID_LEN: usize = 8;

/// A stable, opaque 8-character peer identifier.
///
/// Derived once per installation from the long-lived signing public key and
/// persisted alongside it; never regenerated for the life of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Derive a peer id from a public key: the first 8 hex characters of
    /// `SHA-256(pubkey)`, uppercased. Collisions are astronomically
    /// unlikely and are not otherwise guarded against, matching the
    /// "opaque identifier" contract in the data model — it is not claimed
    /// to be globally unique, only stable per installation.
    #[must_use]
    pub fn from_public_key(pubkey: &[u8]) -> Self {
        let digest = Sha256::digest(pubkey);
        let hex = hex::encode(digest);
        Self(hex[..PEER_ID_LEN].to_ascii_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = std::convert::Infallible;

    /// Parse an identifier as displayed by discovery events or persisted
    /// settings back into a [`PeerId`]. Case-insensitive, since identifiers
    /// are always rendered uppercase but operators may type them in
    /// lowercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_ascii_uppercase()))
    }
}

/// This installation's stable identity: identifier, long-lived public
/// signing key, and a human-readable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub public_key: Vec<u8>,
    pub name: String,
}

impl PeerIdentity {
    #[must_use]
    pub fn new(public_key: Vec<u8>, name: String) -> Self {
        let id = PeerId::from_public_key(&public_key);
        Self {
            id,
            public_key,
            name,
        }
    }
}

/// A persisted trust binding: identifier to the public key approved for it.
///
/// Read on every inbound signature verification; written only when the user
/// explicitly trusts a peer (`trust_peer`) or on first-use if TOFU is
/// configured to auto-trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedPeerEntry {
    pub id: PeerId,
    pub name: String,
    pub public_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_deterministic() {
        let key = vec![1, 2, 3, 4];
        assert_eq!(PeerId::from_public_key(&key), PeerId::from_public_key(&key));
    }

    #[test]
    fn peer_id_length() {
        let id = PeerId::from_public_key(b"some public key bytes");
        assert_eq!(id.as_str().len(), PEER_ID_LEN);
    }

    #[test]
    fn different_keys_different_ids() {
        let a = PeerId::from_public_key(b"key a");
        let b = PeerId::from_public_key(b"key b");
        assert_ne!(a, b);
    }
}
