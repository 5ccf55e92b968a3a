//! `swarm-sync`: daemon binary wiring the CLI control surface onto
//! [`swarm_engine::SyncEngine`].
//!
//! Exit codes, per §6.6: 0 normal, 1 fatal error, 2 configuration error.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use std::fmt;
use std::str::FromStr;
use swarm_core::PeerId;
use swarm_engine::{EngineConfig, EngineEvent, InstallState};

#[derive(Debug)]
struct ConfigFailure(String);

impl fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigFailure {}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) if err.is::<ConfigFailure>() => {
            tracing::error!(%err, "configuration error");
            2
        }
        Err(err) => {
            tracing::error!(%err, "fatal error");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let install = InstallState::load(cli.config_dir).map_err(|err| ConfigFailure(err.to_string()))?;

    // Every control-surface command is expressed as a method on a running
    // [`swarm_engine::SyncEngine`]: one-shot commands start it, perform the
    // action, and stop it again.
    let (engine, mut events) = swarm_engine::SyncEngine::start(install, EngineConfig::default())
        .await
        .context("failed to start sync engine")?;

    match cli.command {
        Commands::Run => {
            tracing::info!(sync_root = %engine.sync_root().display(), "swarm-sync daemon started");
            let events_task = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    log_event(&event);
                }
            });
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
            engine.stop();
            let _ = events_task.await;
        }
        Commands::ForceSync => {
            engine.force_sync().await.context("force sync failed")?;
            engine.stop();
            println!("sync folder rescanned and manifest pushed to eligible peers");
        }
        Commands::TrustPeer { id, name, public_key } => {
            let public_key = hex::decode(&public_key).context("public key must be hex-encoded")?;
            let peer_id = PeerId::from_str(&id).expect("PeerId parsing is infallible");
            engine.trust_peer(peer_id.clone(), name, public_key).context("failed to trust peer")?;
            engine.stop();
            println!("trusted peer {peer_id}");
        }
        Commands::UntrustPeer { id } => {
            let peer_id = PeerId::from_str(&id).expect("PeerId parsing is infallible");
            engine.untrust_peer(&peer_id).context("failed to untrust peer")?;
            engine.stop();
            println!("removed trust for peer {peer_id}");
        }
        Commands::SetSyncFolder { path } => {
            engine.set_sync_folder(path.clone()).await.context("failed to change sync folder")?;
            engine.stop();
            println!("sync folder set to {}", path.display());
        }
        Commands::ListVersions { relative_path } => {
            let versions = engine.list_versions(&relative_path).context("failed to list versions")?;
            engine.stop();
            if versions.is_empty() {
                println!("no archived versions for {relative_path}");
            }
            for entry in versions {
                println!(
                    "{}  {}  {} bytes  {:?}  source={:?}",
                    entry.version_id, entry.created_at, entry.size, entry.reason, entry.source_peer
                );
            }
        }
        Commands::RestoreVersion { relative_path, version_id } => {
            let entry = engine
                .list_versions(&relative_path)
                .context("failed to list versions")?
                .into_iter()
                .find(|entry| entry.version_id == version_id)
                .ok_or_else(|| anyhow::anyhow!("no version {version_id} found for {relative_path}"))?;
            let restored = engine.restore_version(&entry).await.context("failed to restore version")?;
            engine.stop();
            println!("restored {} to {}", restored.relative_path, restored.target_path.display());
        }
    }

    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::PeerDiscovered(id) => tracing::info!(peer = %id, "peer discovered"),
        EngineEvent::UntrustedPeerDiscovered(id) => tracing::warn!(peer = %id, "untrusted peer discovered"),
        EngineEvent::PeerLost(id) => tracing::info!(peer = %id, "peer lost"),
        EngineEvent::TrustConflict { id } => tracing::warn!(peer = %id, "trust conflict"),
        EngineEvent::TransferStarted { relative_path, peer } => {
            tracing::debug!(path = %relative_path, peer = %peer, "transfer started");
        }
        EngineEvent::TransferProgress { relative_path, bytes_done, bytes_total } => {
            tracing::debug!(path = %relative_path, bytes_done, bytes_total, "transfer progress");
        }
        EngineEvent::TransferCompleted { relative_path, peer } => {
            tracing::info!(path = %relative_path, peer = %peer, "transfer completed");
        }
        EngineEvent::TransferFailed { relative_path, peer, reason } => {
            tracing::warn!(path = %relative_path, peer = %peer, reason, "transfer failed");
        }
        EngineEvent::FileChanged { relative_path } => tracing::debug!(path = %relative_path, "file changed"),
        EngineEvent::SyncStatusChanged(status) => tracing::info!(?status, "sync status changed"),
        EngineEvent::ConflictNeedsResolution { relative_path, peer } => {
            tracing::warn!(path = %relative_path, peer = %peer, "conflict needs resolution");
        }
        EngineEvent::ActivityLog { relative_path, winner, method, peer } => {
            tracing::info!(path = %relative_path, ?winner, method, peer = ?peer, "activity");
        }
        EngineEvent::Warning(message) => tracing::warn!("{message}"),
        EngineEvent::Error(message) => tracing::error!("{message}"),
    }
}
