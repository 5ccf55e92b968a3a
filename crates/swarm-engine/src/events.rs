//! Typed events the engine emits to an observer; the surrounding process
//! (daemon, UI, tests) decides what to do with them. Kept deliberately
//! decoupled from any specific UI or notification mechanism — those are
//! explicitly out of scope for this crate.

use std::path::PathBuf;
use swarm_core::PeerId;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PeerDiscovered(PeerId),
    UntrustedPeerDiscovered(PeerId),
    PeerLost(PeerId),
    TrustConflict { id: PeerId },

    TransferStarted { relative_path: String, peer: PeerId },
    TransferProgress { relative_path: String, bytes_done: u64, bytes_total: u64 },
    TransferCompleted { relative_path: String, peer: PeerId },
    TransferFailed { relative_path: String, peer: PeerId, reason: String },

    FileChanged { relative_path: String },
    SyncStatusChanged(SyncStatus),

    ConflictNeedsResolution { relative_path: String, peer: PeerId },
    ActivityLog { relative_path: String, winner: ConflictWinner, method: &'static str, peer: Option<PeerId> },

    Warning(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Scanning,
    Syncing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Handle to the destination of a version restored onto disk, surfaced
/// alongside completion events so callers can locate the result without
/// re-deriving a path.
#[derive(Debug, Clone)]
pub struct RestoredVersion {
    pub relative_path: String,
    pub target_path: PathBuf,
}
