//! Events the discovery subsystem emits to its observer (the sync engine
//! and, transitively, the surrounding process's UI layer).

use swarm_core::{PeerId, PeerRecord};

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A peer was inserted into the table for the first time.
    PeerDiscovered(PeerRecord),
    /// An untrusted peer's first broadcast was observed.
    UntrustedPeerDiscovered(PeerRecord),
    /// A trusted identifier broadcast with a public key other than the one
    /// bound to it. The peer is rejected; no table entry is created or
    /// refreshed for it.
    TrustConflict { id: PeerId, expected: Vec<u8>, observed: Vec<u8> },
    /// A previously-seen peer's `last_seen` exceeded the TTL and was
    /// evicted from the table.
    PeerLost(PeerId),
    /// The configured discovery port was unavailable; broadcasting
    /// continues from an ephemeral send-only socket, but this host will
    /// not be discoverable by peers that haven't already cached its
    /// address.
    BindingFailed { requested_port: u16, bound_port: u16 },
}
