//! Argument parsing for the `swarm-sync` binary, patterned on
//! `wraith-cli`'s `Cli`/`Commands` derive structure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// swarm-sync: a LAN peer-to-peer file synchronization daemon.
#[derive(Parser)]
#[command(name = "swarm-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the platform config directory (identity, settings, cache).
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the daemon and run until interrupted (§6.6 `start`/`stop`).
    Run,

    /// Force an immediate rescan and manifest push to every eligible peer.
    ForceSync,

    /// Add a peer to the trusted set.
    TrustPeer {
        /// Peer identifier, as printed by discovery events.
        id: String,
        /// Human-readable name for the peer.
        name: String,
        /// Peer's public key, hex-encoded.
        public_key: String,
    },

    /// Remove a peer from the trusted set.
    UntrustPeer {
        /// Peer identifier to remove.
        id: String,
    },

    /// Change the folder being synchronized.
    SetSyncFolder {
        /// New sync folder path.
        path: PathBuf,
    },

    /// List archived versions of a file.
    ListVersions {
        /// Path relative to the sync folder.
        relative_path: String,
    },

    /// Restore an archived version of a file back onto disk.
    RestoreVersion {
        /// Path relative to the sync folder.
        relative_path: String,
        /// Version identifier, as printed by `list-versions`.
        version_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_peer_parses_three_positional_args() {
        let cli = Cli::parse_from(["swarm-sync", "trust-peer", "ABCD1234", "laptop", "deadbeef"]);
        match cli.command {
            Commands::TrustPeer { id, name, public_key } => {
                assert_eq!(id, "ABCD1234");
                assert_eq!(name, "laptop");
                assert_eq!(public_key, "deadbeef");
            }
            _ => panic!("expected TrustPeer"),
        }
    }

    #[test]
    fn verbose_and_config_dir_are_global_flags_before_or_after_subcommand() {
        let cli = Cli::parse_from(["swarm-sync", "--verbose", "force-sync"]);
        assert!(cli.verbose);

        let cli = Cli::parse_from(["swarm-sync", "--config-dir", "/tmp/swarm", "run"]);
        assert_eq!(cli.config_dir.as_deref(), Some(std::path::Path::new("/tmp/swarm")));
    }

    #[test]
    fn restore_version_requires_both_positional_args() {
        let result = Cli::try_parse_from(["swarm-sync", "restore-version", "docs/a.txt"]);
        assert!(result.is_err());
    }
}
