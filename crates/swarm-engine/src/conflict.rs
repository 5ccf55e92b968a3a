//! Conflict policy: triggered when an inbound `FileChanged` (or a manifest
//! reconciliation difference) carries a content hash that disagrees with
//! the locally tracked one. Pure decision logic, kept free of I/O so it is
//! exhaustively unit-testable; `SyncEngine::apply_conflict` carries out the
//! chosen [`Resolution`].

use crate::events::ConflictWinner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_core::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictMode {
    /// Compare last-modified timestamps; the later one wins. Ties broken
    /// by peer-identifier lexicographic order.
    AutoNewest,
    /// Keep local unchanged; write remote beside it as a renamed copy.
    KeepBoth,
    /// Discard remote; re-converge the peer onto the local copy.
    AlwaysKeepLocal,
    /// Overwrite local with remote (versioned first).
    AlwaysKeepRemote,
    /// Surface the conflict and wait for an explicit choice.
    AskUser,
}

impl Default for ConflictMode {
    fn default() -> Self {
        Self::AutoNewest
    }
}

/// What a conflict resolution decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Apply the incoming content; version the local copy first if
    /// `version_local_first` is set.
    AcceptRemote { version_local_first: bool },
    /// Keep the local copy; optionally echo it back to the peer so the
    /// peer re-converges.
    KeepLocal { echo_back: bool },
    /// Keep local untouched and additionally write the remote payload to
    /// a side-by-side conflict-named copy.
    KeepBothSideBySide { conflict_name: String },
    /// Suspend application; the caller must surface
    /// [`crate::events::EngineEvent::ConflictNeedsResolution`] and wait.
    AwaitUserChoice,
}

pub struct ConflictInput<'a> {
    pub relative_path: &'a str,
    pub local_modified: DateTime<Utc>,
    pub remote_modified: DateTime<Utc>,
    pub local_peer: &'a PeerId,
    pub remote_peer: &'a PeerId,
    pub now: DateTime<Utc>,
}

/// Decide how to resolve one conflict under `mode`. Returns the
/// resolution plus which side nominally "won" for activity logging.
#[must_use]
pub fn resolve(mode: ConflictMode, input: &ConflictInput<'_>) -> (Resolution, ConflictWinner) {
    match mode {
        ConflictMode::AutoNewest => {
            let remote_wins = match input.local_modified.cmp(&input.remote_modified) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                // Ties broken by peer-identifier lexicographic order: the
                // higher identifier is treated as "later".
                std::cmp::Ordering::Equal => input.remote_peer > input.local_peer,
            };
            if remote_wins {
                (Resolution::AcceptRemote { version_local_first: true }, ConflictWinner::Remote)
            } else {
                (Resolution::KeepLocal { echo_back: false }, ConflictWinner::Local)
            }
        }
        ConflictMode::KeepBoth => {
            let conflict_name = conflict_copy_name(input.relative_path, input.remote_peer, input.now);
            (Resolution::KeepBothSideBySide { conflict_name }, ConflictWinner::Local)
        }
        ConflictMode::AlwaysKeepLocal => {
            (Resolution::KeepLocal { echo_back: true }, ConflictWinner::Local)
        }
        ConflictMode::AlwaysKeepRemote => {
            (Resolution::AcceptRemote { version_local_first: true }, ConflictWinner::Remote)
        }
        ConflictMode::AskUser => (Resolution::AwaitUserChoice, ConflictWinner::Local),
    }
}

/// `<name> (conflict <yyyyMMdd-HHmmss> from <peer>)<ext>`, per §4.H.5.
#[must_use]
pub fn conflict_copy_name(relative_path: &str, peer: &PeerId, at: DateTime<Utc>) -> String {
    let (stem, ext) = match relative_path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (relative_path, String::new()),
    };
    let timestamp = at.format("%Y%m%d-%H%M%S");
    format!("{stem} (conflict {timestamp} from {peer}){ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn peer(tag: &str) -> PeerId {
        PeerId::from_public_key(tag.as_bytes())
    }

    #[test]
    fn auto_newest_prefers_later_timestamp() {
        let local = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let remote = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        let input = ConflictInput {
            relative_path: "doc.md",
            local_modified: local,
            remote_modified: remote,
            local_peer: &peer("a"),
            remote_peer: &peer("b"),
            now: remote,
        };
        let (resolution, winner) = resolve(ConflictMode::AutoNewest, &input);
        assert_eq!(winner, ConflictWinner::Remote);
        assert_eq!(resolution, Resolution::AcceptRemote { version_local_first: true });
    }

    #[test]
    fn auto_newest_tie_breaks_on_peer_id() {
        let same = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local_peer = PeerId::from_public_key(b"AAA");
        let remote_peer = PeerId::from_public_key(b"ZZZ");
        let input = ConflictInput {
            relative_path: "doc.md",
            local_modified: same,
            remote_modified: same,
            local_peer: &local_peer,
            remote_peer: &remote_peer,
            now: same,
        };
        let (_, winner) = resolve(ConflictMode::AutoNewest, &input);
        // Whichever id sorts higher lexicographically wins the tie.
        let expected = if remote_peer > local_peer { ConflictWinner::Remote } else { ConflictWinner::Local };
        assert_eq!(winner, expected);
    }

    #[test]
    fn keep_both_names_side_by_side_copy() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let name = conflict_copy_name("docs/notes.txt", &peer("peer1"), at);
        assert!(name.starts_with("docs/notes (conflict 20260304-050607 from"));
        assert!(name.ends_with(").txt"));
    }

    #[test]
    fn always_keep_local_echoes_back() {
        let local = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let input = ConflictInput {
            relative_path: "doc.md",
            local_modified: local,
            remote_modified: local,
            local_peer: &peer("a"),
            remote_peer: &peer("b"),
            now: local,
        };
        let (resolution, winner) = resolve(ConflictMode::AlwaysKeepLocal, &input);
        assert_eq!(winner, ConflictWinner::Local);
        assert_eq!(resolution, Resolution::KeepLocal { echo_back: true });
    }

    #[test]
    fn ask_user_suspends_application() {
        let local = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let input = ConflictInput {
            relative_path: "doc.md",
            local_modified: local,
            remote_modified: local,
            local_peer: &peer("a"),
            remote_peer: &peer("b"),
            now: local,
        };
        let (resolution, _) = resolve(ConflictMode::AskUser, &input);
        assert_eq!(resolution, Resolution::AwaitUserChoice);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    proptest! {
        /// `AutoNewest` is a deterministic total order: given the same pair
        /// of timestamps and peer identifiers, `resolve` always picks the
        /// same winner, and the later timestamp always wins regardless of
        /// which side is "local" vs "remote".
        #[test]
        fn auto_newest_is_deterministic_and_later_wins(
            local_secs in 0i64..1_000_000,
            remote_secs in 0i64..1_000_000,
            local_tag in "[a-z]{1,12}",
            remote_tag in "[a-z]{1,12}",
        ) {
            let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let local_modified = base + chrono::Duration::seconds(local_secs);
            let remote_modified = base + chrono::Duration::seconds(remote_secs);
            let local_peer = PeerId::from_public_key(local_tag.as_bytes());
            let remote_peer = PeerId::from_public_key(remote_tag.as_bytes());

            let input = ConflictInput {
                relative_path: "doc.md",
                local_modified,
                remote_modified,
                local_peer: &local_peer,
                remote_peer: &remote_peer,
                now: base,
            };

            let (resolution_a, winner_a) = resolve(ConflictMode::AutoNewest, &input);
            let (resolution_b, winner_b) = resolve(ConflictMode::AutoNewest, &input);
            prop_assert_eq!(&resolution_a, &resolution_b);
            prop_assert_eq!(winner_a, winner_b);

            if remote_modified > local_modified {
                prop_assert_eq!(winner_a, ConflictWinner::Remote);
            } else if remote_modified < local_modified {
                prop_assert_eq!(winner_a, ConflictWinner::Local);
            }
        }
    }
}
