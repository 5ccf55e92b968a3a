//! Shared data model for `swarm-sync`: peer identity, wire messages, and the
//! parse-error taxonomy used when decoding hex-encoded identifiers and
//! hashes off the wire or out of persisted state.

pub mod cancel;
pub mod error;
pub mod identity;
pub mod wire;

pub use cancel::CancellationToken;
pub use error::{ParseError, parse_fixed_array};
pub use identity::{PEER_ID_LEN, PeerId, PeerIdentity, TrustedPeerEntry};
pub use wire::{
    BlockSignature, DeltaInstruction, PeerRecord, SYNC_MESSAGE_MARKER, SyncMessage, TrackedFile,
    VersionEntry, VersionReason, WireError,
};
