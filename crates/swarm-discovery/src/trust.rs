//! The narrow view of the local trust store discovery needs: given a peer
//! identifier, what public key (if any) is it bound to. The sync engine's
//! settings layer implements this; discovery never mutates trust state.

use swarm_core::PeerId;

pub trait TrustStore: Send + Sync {
    fn trusted_key(&self, id: &PeerId) -> Option<Vec<u8>>;
}

/// A trust store with no entries, useful for tests and for hosts that
/// haven't trusted anyone yet.
pub struct NoTrust;

impl TrustStore for NoTrust {
    fn trusted_key(&self, _id: &PeerId) -> Option<Vec<u8>> {
        None
    }
}
