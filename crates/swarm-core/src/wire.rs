//! Wire-level and tracked-state data types shared between the discovery,
//! transport, and sync-engine crates.

use crate::identity::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A peer as observed in the runtime discovery table. Inserted on first
/// valid broadcast, refreshed on each subsequent one, evicted when
/// `now - last_seen > peer_ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    pub address: SocketAddr,
    pub transfer_port: u16,
    pub sync_enabled: bool,
    pub public_key: Vec<u8>,
    /// Derived: true iff `id` maps to `public_key` in the trusted set.
    pub trusted: bool,
}

/// A single tracked file (or directory) under a sync folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Forward-slash, NFC-normalized, case-preserving relative path.
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the file's byte content. Empty for
    /// directories.
    pub content_hash: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub is_directory: bool,
    /// The peer that last wrote this entry locally (the local identifier
    /// for local edits).
    pub origin: PeerId,
}

impl TrackedFile {
    /// The lowercased key used for case-insensitive path comparisons.
    #[must_use]
    pub fn path_key(&self) -> String {
        self.relative_path.to_lowercase()
    }
}

/// Weak (Adler-32) and strong (SHA-256) checksums for one 64 KiB block of a
/// file, used by the delta engine to locate reusable regions of a base copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub index: u32,
    pub weak: u32,
    pub strong: [u8; 32],
}

/// One instruction in a delta: either copy a block from the base file, or
/// insert literal bytes not present in the base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaInstruction {
    Copy { source_block_index: u32, length: u32 },
    Insert { bytes: Vec<u8>, length: u32 },
}

/// Why a version was archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionReason {
    Conflict,
    BeforeSync,
    Manual,
    BeforeDelete,
}

/// An archived prior revision of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub original_path: String,
    /// Monotonic timestamp identifier, sub-second resolution.
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub content_hash: String,
    pub reason: VersionReason,
    pub source_peer: Option<PeerId>,
}

/// The wire-level discriminated union exchanged over a [secure
/// channel](https://docs.rs/swarm-transport) once a session is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    Manifest { files: Vec<TrackedFile> },
    FileChanged { header: TrackedFile, bytes: Vec<u8> },
    FileDeleted { relative_path: String, is_directory: bool },
    RequestFile { relative_path: String },
    DirCreated { relative_path: String },
    DirDeleted { relative_path: String },
    FileRenamed { old_path: String, new_path: String },
    RequestSignatures { relative_path: String },
    BlockSignatures { base_hash: String, blocks: Vec<BlockSignature> },
    DeltaData { relative_path: String, instructions: Vec<DeltaInstruction> },
}

/// Marker string prefixing every sync message, written as a `u32_be`
/// length-prefixed UTF-8 string ahead of the type tag and JSON body. This
/// implementation always uses `u32_be` string-length prefixes, not the
/// 7-bit varint form some peers may use.
pub const SYNC_MESSAGE_MARKER: &str = "SWARM_SYNC:1.0";

/// Errors decoding a [`SyncMessage`] envelope off a secure channel.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated message envelope")]
    Truncated,
    #[error("unrecognized protocol marker")]
    BadMarker,
    #[error("invalid message body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl SyncMessage {
    /// The wire tag for this message's variant.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            SyncMessage::Manifest { .. } => 0x01,
            SyncMessage::FileChanged { .. } => 0x02,
            SyncMessage::FileDeleted { .. } => 0x03,
            SyncMessage::RequestFile { .. } => 0x04,
            SyncMessage::DirCreated { .. } => 0x06,
            SyncMessage::DirDeleted { .. } => 0x07,
            SyncMessage::FileRenamed { .. } => 0x08,
            SyncMessage::RequestSignatures { .. } => 0x10,
            SyncMessage::BlockSignatures { .. } => 0x11,
            SyncMessage::DeltaData { .. } => 0x12,
        }
    }

    /// Encode this message as the plaintext envelope carried inside one
    /// AEAD record: marker string, tag byte, JSON body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let marker = SYNC_MESSAGE_MARKER.as_bytes();
        let body = serde_json::to_vec(self).expect("SyncMessage always serializes");

        let mut out = Vec::with_capacity(4 + marker.len() + 1 + body.len());
        out.extend_from_slice(&(marker.len() as u32).to_be_bytes());
        out.extend_from_slice(marker);
        out.push(self.tag());
        out.extend_from_slice(&body);
        out
    }

    /// Decode a plaintext envelope produced by [`SyncMessage::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated);
        }
        let marker_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let rest = &buf[4..];
        if rest.len() < marker_len + 1 {
            return Err(WireError::Truncated);
        }
        let marker = &rest[..marker_len];
        if marker != SYNC_MESSAGE_MARKER.as_bytes() {
            return Err(WireError::BadMarker);
        }
        let body = &rest[marker_len + 1..];
        let msg: SyncMessage = serde_json::from_slice(body)?;
        Ok(msg)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any `RequestFile` built from an arbitrary relative path survives
        /// `encode`/`decode` byte-for-byte, and `path_key` is always the
        /// lowercase form of `relative_path` regardless of input casing.
        #[test]
        fn request_file_roundtrip(path in "[a-zA-Z0-9_./-]{0,64}") {
            let msg = SyncMessage::RequestFile { relative_path: path.clone() };
            let decoded = SyncMessage::decode(&msg.encode()).unwrap();
            prop_assert_eq!(msg, decoded);

            let f = TrackedFile {
                relative_path: path.clone(),
                content_hash: String::new(),
                size: 0,
                last_modified: Utc::now(),
                is_directory: false,
                origin: PeerId::from_public_key(b"x"),
            };
            prop_assert_eq!(f.path_key(), path.to_lowercase());
        }
    }
}
