//! The sync engine: wires discovery, transport, the watcher, and the
//! persisted tracked-file state together into the running daemon.
//! Everything else in this crate is policy and storage; this module is
//! where it gets driven.

use crate::conflict::{ConflictInput, Resolution, resolve};
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineEvent, RestoredVersion, SyncStatus};
use crate::scan::{hash_bytes, hash_file, normalize_relative_path, scan_sync_folder};
use crate::state::{IgnoreRules, InstallState, Settings, SettingsStore, TrackedCache, ignore_rules_for};
use crate::tombstones::TombstoneSet;
use crate::tracked::TrackedMap;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex as SyncMutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use swarm_core::{BlockSignature, DeltaInstruction, SyncMessage, TrackedFile, VersionEntry, VersionReason};
use swarm_core::{CancellationToken, PeerId, PeerRecord};
use swarm_discovery::{DiscoveryEvent, DiscoveryManager, LocalAnnouncement, TrustStore};
use swarm_files::{VersioningStore, apply_delta, compute_delta, compute_signatures};
use swarm_transport::{ConnectionPool, listener};
use swarm_watch::{EchoSuppressor, FileWatcher, IgnorePolicy, WatchEvent};
use tokio::sync::{RwLock as AsyncRwLock, mpsc, oneshot};
use tracing::{debug, warn};

/// Default name of the per-folder version archive directory, kept in
/// sync with [`swarm_watch::IgnorePolicy`]'s default so the watcher never
/// raises raw events for our own version blobs.
const VERSIONS_DIR_NAME: &str = ".swarm-versions";

/// Knobs the surrounding process (the daemon binary, or a test) supplies
/// at startup; everything else is read from persisted [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub device_name: String,
    pub transfer_port: u16,
    /// How often the engine pushes a full [`SyncMessage::Manifest`] to
    /// every eligible peer for background reconciliation.
    pub manifest_interval: Duration,
    /// How often tombstones are purged, the version store pruned, and the
    /// rehash-skip cache flushed to disk.
    pub maintenance_interval: Duration,
    /// How long to wait for a peer's `BlockSignatures` reply before
    /// falling back to a full-content transfer.
    pub delta_signature_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "swarm-sync-host".to_string(),
            transfer_port: 0,
            manifest_interval: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(300),
            delta_signature_timeout: Duration::from_secs(10),
        }
    }
}

/// Bridges the engine's live, mutex-guarded [`Settings`] into the narrow
/// view [`swarm_discovery::TrustStore`] needs, without discovery taking a
/// dependency on the engine's settings type directly.
struct SettingsTrustStore(Arc<SyncMutex<Settings>>);

impl TrustStore for SettingsTrustStore {
    fn trusted_key(&self, id: &PeerId) -> Option<Vec<u8>> {
        self.0.lock().trusted_peers.get(id).map(|info| info.public_key.clone())
    }
}

/// Who is waiting on the one delta-signature exchange currently in
/// flight. `SyncMessage::BlockSignatures` carries no path of its own, so
/// only one such exchange can be outstanding at a time; see
/// `try_delta_update`.
type PendingSignatures = Option<(String, oneshot::Sender<Vec<BlockSignature>>)>;

/// The running sync engine. Every background task holds a clone of the
/// surrounding `Arc`; dropping the last clone after [`SyncEngine::stop`]
/// tears the whole thing down.
pub struct SyncEngine {
    config: EngineConfig,
    local_id: PeerId,
    settings_store: SettingsStore,
    settings: Arc<SyncMutex<Settings>>,
    sync_root: SyncMutex<PathBuf>,
    ignore_rules: SyncMutex<IgnoreRules>,
    cache: SyncMutex<TrackedCache>,
    tracked: TrackedMap,
    tombstones: TombstoneSet,
    versioning: SyncMutex<VersioningStore>,
    pool: ConnectionPool,
    discovery: Arc<DiscoveryManager>,
    echo: Arc<EchoSuppressor>,
    watcher: SyncMutex<Option<FileWatcher>>,
    pending_signatures: SyncMutex<PendingSignatures>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    enabled: AtomicBool,
    cancel: CancellationToken,
    /// Monotonic counter of bytes moved over completed transfers (both
    /// directions) this run. Per spec §9's open question on speed-meter
    /// accuracy, this is an estimate updated only on completed reads/
    /// writes — no attempt is made to interpolate in-flight bytes.
    session_bytes_transferred: AtomicU64,
    last_sync_time: SyncMutex<Option<DateTime<Utc>>>,
    /// Paths for which a `FileChanged` payload already failed its
    /// declared-hash check once and a resend was requested. Per §4.H.8, a
    /// second mismatch for the same path surfaces `TransferFailed` instead
    /// of requesting another resend.
    pending_hash_retry: SyncMutex<std::collections::HashSet<String>>,
}

/// Thin handle returned to the surrounding process. Exists mainly so
/// `stop` reads naturally at the call site; everything else passes
/// through to [`SyncEngine`] via `Deref`.
pub struct EngineHandle {
    pub engine: Arc<SyncEngine>,
}

impl std::ops::Deref for EngineHandle {
    type Target = SyncEngine;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl EngineHandle {
    pub fn stop(&self) {
        self.engine.stop();
    }
}

fn versions_dir(sync_root: &Path) -> PathBuf {
    sync_root.join(VERSIONS_DIR_NAME)
}

/// The actual TCP dial target for a peer: discovery only observes the
/// source address of its UDP broadcasts, which is not the peer's TCP
/// listener.
fn peer_address(peer: &PeerRecord) -> SocketAddr {
    SocketAddr::new(peer.address.ip(), peer.transfer_port)
}

impl SyncEngine {
    /// Build and start a fully wired engine: loads the tracked-file state
    /// from disk, binds discovery and the transfer listener, and spawns
    /// every background task. Returns once startup has succeeded; the
    /// returned receiver carries every event the engine emits from then
    /// on.
    pub async fn start(
        install: InstallState,
        config: EngineConfig,
    ) -> SyncResult<(Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>)> {
        let identity = Arc::new(install.identity);
        let local_id = PeerId::from_public_key(&identity.public_key_bytes());

        let settings = Arc::new(SyncMutex::new(install.settings));
        let (sync_root, ignore_rules, tombstone_grace, max_versions, max_age_days) = {
            let guard = settings.lock();
            (
                guard.sync_folder.clone(),
                ignore_rules_for(&guard),
                guard.tombstone_grace_hours,
                guard.versioning.max_versions_per_file,
                guard.versioning.max_age_days,
            )
        };

        let mut cache = TrackedCache::load(&sync_root);
        let tracked = TrackedMap::new();
        scan_sync_folder(&sync_root, &ignore_rules, &mut cache, &tracked, &local_id)?;

        let tombstones = TombstoneSet::new(ChronoDuration::hours(tombstone_grace));
        let versioning = VersioningStore::new(versions_dir(&sync_root), max_versions, max_age_days);

        let pool = ConnectionPool::new(identity.clone(), local_id.clone(), config.device_name.clone());

        let cancel = CancellationToken::new();
        let trust_store: Arc<dyn TrustStore> = Arc::new(SettingsTrustStore(settings.clone()));
        let announcement = LocalAnnouncement {
            identity: identity.clone(),
            local_id: local_id.clone(),
            local_name: config.device_name.clone(),
            transfer_port: config.transfer_port,
            sync_enabled: AsyncRwLock::new(true),
        };
        let (discovery, discovery_rx) = DiscoveryManager::bind(announcement, trust_store, cancel.child()).await?;
        discovery.spawn();

        let bind_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.transfer_port);
        let tcp_listener = listener::bind(bind_addr).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let echo = Arc::new(EchoSuppressor::default());

        let engine = Arc::new(Self {
            config,
            local_id,
            settings_store: install.settings_store,
            settings,
            sync_root: SyncMutex::new(sync_root),
            ignore_rules: SyncMutex::new(ignore_rules),
            cache: SyncMutex::new(cache),
            tracked,
            tombstones,
            versioning: SyncMutex::new(versioning),
            pool,
            discovery,
            echo,
            watcher: SyncMutex::new(None),
            pending_signatures: SyncMutex::new(None),
            events_tx,
            enabled: AtomicBool::new(true),
            cancel,
            session_bytes_transferred: AtomicU64::new(0),
            last_sync_time: SyncMutex::new(None),
            pending_hash_retry: SyncMutex::new(std::collections::HashSet::new()),
        });

        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.accept_loop(tcp_listener).await });
        }
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.forward_discovery_events(discovery_rx).await });
        }
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.manifest_loop().await });
        }
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.maintenance_loop().await });
        }
        engine.respawn_watcher()?;

        Ok((engine, events_rx))
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn sync_root(&self) -> PathBuf {
        self.sync_root.lock().clone()
    }

    /// Total bytes moved over completed transfers (both directions) since
    /// this engine started. An estimate, not a precise speed-meter value:
    /// bytes from transfers still in flight are not counted until they
    /// complete. See spec §9's open question on `_lastBytesUploaded`/
    /// `_lastBytesDownloaded` accuracy.
    #[must_use]
    pub fn session_bytes_transferred(&self) -> u64 {
        self.session_bytes_transferred.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_time.lock()
    }

    // ---- control surface ----------------------------------------------

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.emit(EngineEvent::SyncStatusChanged(if enabled { SyncStatus::Idle } else { SyncStatus::Paused }));
        let discovery = self.discovery.clone();
        tokio::spawn(async move { discovery.set_sync_enabled(enabled).await });
    }

    pub fn trust_peer(&self, id: PeerId, name: String, public_key: Vec<u8>) -> SyncResult<()> {
        let mut settings = self.settings.lock();
        self.settings_store.trust_peer(&mut settings, id, name, public_key)?;
        Ok(())
    }

    pub fn untrust_peer(&self, id: &PeerId) -> SyncResult<()> {
        let mut settings = self.settings.lock();
        self.settings_store.untrust_peer(&mut settings, id)?;
        Ok(())
    }

    pub fn list_versions(&self, relative_path: &str) -> SyncResult<Vec<VersionEntry>> {
        Ok(self.versioning.lock().list_versions(relative_path)?)
    }

    pub async fn restore_version(&self, entry: &VersionEntry) -> SyncResult<RestoredVersion> {
        let target_path = self.sync_root().join(&entry.original_path);
        self.versioning.lock().restore(entry, &target_path)?;
        self.handle_local_change(&target_path).await?;
        Ok(RestoredVersion { relative_path: entry.original_path.clone(), target_path })
    }

    /// Re-point the engine at a new sync folder: persists the setting,
    /// rebuilds ignore rules, the rehash cache, and the version store,
    /// rescans from scratch, and restarts the watcher.
    pub async fn set_sync_folder(self: &Arc<Self>, new_folder: PathBuf) -> SyncResult<()> {
        {
            let mut settings = self.settings.lock();
            settings.sync_folder = new_folder.clone();
            self.settings_store.save(&settings)?;
        }
        *self.sync_root.lock() = new_folder.clone();
        let excluded = self.settings.lock().excluded_subtrees.clone();
        *self.ignore_rules.lock() = IgnoreRules::load(&new_folder, excluded);
        *self.cache.lock() = TrackedCache::load(&new_folder);
        let (max_versions, max_age_days) = {
            let settings = self.settings.lock();
            (settings.versioning.max_versions_per_file, settings.versioning.max_age_days)
        };
        *self.versioning.lock() = VersioningStore::new(versions_dir(&new_folder), max_versions, max_age_days);

        self.full_rescan().await?;
        self.respawn_watcher()?;
        Ok(())
    }

    /// Force an immediate rescan of the sync folder plus a manifest push
    /// to every eligible peer, outside of the usual periodic cadence.
    pub async fn force_sync(self: &Arc<Self>) -> SyncResult<()> {
        self.full_rescan().await?;
        self.broadcast_manifest().await;
        Ok(())
    }

    /// Drop any existing watcher (which stops its underlying `notify`
    /// watch) and start a fresh one rooted at the current sync folder.
    pub fn respawn_watcher(self: &Arc<Self>) -> SyncResult<()> {
        *self.watcher.lock() = None;

        let sync_root = self.sync_root();
        let excluded_prefixes = self.settings.lock().excluded_subtrees.clone();
        let policy = IgnorePolicy { excluded_prefixes, ..IgnorePolicy::default() };

        let (watcher, rx) = FileWatcher::spawn(sync_root, policy, self.echo.clone(), self.cancel.child())?;
        *self.watcher.lock() = Some(watcher);

        let engine = self.clone();
        tokio::spawn(async move { engine.watch_loop(rx).await });
        Ok(())
    }

    // ---- background loops --------------------------------------------

    async fn accept_loop(self: Arc<Self>, tcp_listener: tokio::net::TcpListener) {
        loop {
            let inbound = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = listener::accept_one(&tcp_listener) => result,
            };
            let inbound = match inbound {
                Ok(inbound) => inbound,
                Err(err) => {
                    warn!(%err, "failed to accept inbound connection");
                    continue;
                }
            };

            let remote_id = inbound.handshake.remote_peer_id.clone();
            let trusted = self.settings.lock().trusted_peers.contains_key(&remote_id);
            if !trusted {
                debug!(peer = %remote_id, "rejecting inbound connection from untrusted peer");
                self.emit(EngineEvent::UntrustedPeerDiscovered(remote_id));
                continue;
            }

            let engine = self.clone();
            tokio::spawn(async move { engine.run_inbound_connection(remote_id, inbound.stream).await });
        }
    }

    async fn run_inbound_connection(
        self: Arc<Self>,
        sender: PeerId,
        mut stream: swarm_transport::FramedSecureStream<tokio::net::TcpStream>,
    ) {
        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = stream.read_message() => result,
            };
            let bytes = match received {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(peer = %sender, %err, "inbound connection closed");
                    return;
                }
            };
            let message = match SyncMessage::decode(&bytes) {
                Ok(message) => message,
                Err(err) => {
                    warn!(peer = %sender, %err, "dropping malformed message");
                    continue;
                }
            };
            if let Err(err) = self.dispatch(&sender, message).await {
                warn!(peer = %sender, %err, "failed to handle inbound message");
                self.emit(EngineEvent::Warning(err.to_string()));
            }
        }
    }

    async fn forward_discovery_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<DiscoveryEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            match event {
                DiscoveryEvent::PeerDiscovered(record) => self.emit(EngineEvent::PeerDiscovered(record.id)),
                DiscoveryEvent::UntrustedPeerDiscovered(record) => {
                    self.emit(EngineEvent::UntrustedPeerDiscovered(record.id));
                }
                DiscoveryEvent::TrustConflict { id, .. } => self.emit(EngineEvent::TrustConflict { id }),
                DiscoveryEvent::PeerLost(id) => self.emit(EngineEvent::PeerLost(id)),
                DiscoveryEvent::BindingFailed { requested_port, bound_port } => {
                    self.emit(EngineEvent::Warning(format!(
                        "discovery port {requested_port} unavailable, bound ephemeral port {bound_port} instead"
                    )));
                }
            }
        }
    }

    async fn manifest_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.manifest_interval) => {}
            }
            if !self.enabled.load(Ordering::SeqCst) {
                continue;
            }
            self.broadcast_manifest().await;
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.maintenance_interval) => {}
            }
            self.tombstones.purge_expired();
            if let Err(err) = self.versioning.lock().prune() {
                warn!(%err, "failed to prune version store");
            }
            let sync_root = self.sync_root();
            if let Err(err) = self.cache.lock().save(&sync_root) {
                warn!(%err, "failed to persist rehash cache");
            }
        }
    }

    async fn watch_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            if !self.enabled.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(err) = self.handle_watch_event(event).await {
                warn!(%err, "failed to handle local file-system event");
                self.emit(EngineEvent::Warning(err.to_string()));
            }
        }
    }

    // ---- path helpers --------------------------------------------------

    fn relative_path_of(&self, abs_path: &Path) -> SyncResult<String> {
        let sync_root = self.sync_root();
        let canonical_root = sync_root.canonicalize().unwrap_or(sync_root);
        let relative = abs_path.strip_prefix(&canonical_root).unwrap_or(abs_path);
        Ok(normalize_relative_path(relative))
    }

    fn eligible_peers_sync(&self, records: Vec<PeerRecord>) -> Vec<PeerRecord> {
        records.into_iter().filter(|p| p.trusted && p.sync_enabled).collect()
    }

    async fn eligible_peers(&self) -> Vec<PeerRecord> {
        let all = self.discovery.peers().await;
        self.eligible_peers_sync(all)
    }

    async fn send_to_peer(&self, peer: &PeerRecord, message: &SyncMessage) -> SyncResult<()> {
        let addr = peer_address(peer);
        let channel = self.pool.acquire(addr, peer.id.clone()).await?;
        channel.send(&message.encode()).await?;
        Ok(())
    }

    // ---- local change propagation --------------------------------------

    async fn handle_watch_event(self: &Arc<Self>, event: WatchEvent) -> SyncResult<()> {
        match event {
            WatchEvent::Created(path) | WatchEvent::Modified(path) => self.handle_local_change(&path).await,
            WatchEvent::Deleted(path) => self.handle_local_delete(&path).await,
            WatchEvent::Renamed { from, to } => self.handle_local_rename(&from, &to).await,
            WatchEvent::RescanRequested => self.full_rescan().await,
        }
    }

    async fn handle_local_change(&self, abs_path: &Path) -> SyncResult<()> {
        let relative = self.relative_path_of(abs_path)?;
        let path_key = relative.to_lowercase();

        let sync_root = self.sync_root();
        let ignored = {
            let ignore_rules = self.ignore_rules.lock();
            ignore_rules.is_ignored(&sync_root, Path::new(&relative), abs_path.is_dir())
        };
        if ignored {
            return Ok(());
        }

        let metadata = match std::fs::metadata(abs_path) {
            Ok(metadata) => metadata,
            Err(_) => return Ok(()), // vanished again between the event and now
        };

        if metadata.is_dir() {
            self.tracked.insert(TrackedFile {
                relative_path: relative.clone(),
                content_hash: String::new(),
                size: 0,
                last_modified: Utc::now(),
                is_directory: true,
                origin: self.local_id.clone(),
            });
            self.tombstones.forget(&path_key);
            self.emit(EngineEvent::FileChanged { relative_path: relative.clone() });
            for peer in self.eligible_peers().await {
                let message = SyncMessage::DirCreated { relative_path: relative.clone() };
                if let Err(err) = self.send_to_peer(&peer, &message).await {
                    warn!(peer = %peer.id, %err, "failed to propagate directory creation");
                }
            }
            return Ok(());
        }

        let previous = self.tracked.get(&path_key);
        let content_hash = hash_file(abs_path)?;
        if let Some(prev) = &previous {
            if prev.content_hash == content_hash && !prev.is_directory {
                return Ok(()); // metadata-only churn, e.g. touch
            }
        }

        let size = metadata.len();
        let last_modified: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        self.cache.lock().update(path_key.clone(), content_hash.clone(), size, last_modified);

        let file = TrackedFile {
            relative_path: relative.clone(),
            content_hash,
            size,
            last_modified,
            is_directory: false,
            origin: self.local_id.clone(),
        };
        self.tracked.insert(file.clone());
        self.tombstones.forget(&path_key);
        self.emit(EngineEvent::FileChanged { relative_path: relative.clone() });

        let allow_delta = previous.is_some();
        for peer in self.eligible_peers().await {
            if let Err(err) = self.send_file_update(&peer, &file, allow_delta).await {
                warn!(peer = %peer.id, %err, "failed to propagate file update");
                self.emit(EngineEvent::TransferFailed {
                    relative_path: relative.clone(),
                    peer: peer.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn handle_local_delete(&self, abs_path: &Path) -> SyncResult<()> {
        let relative = self.relative_path_of(abs_path)?;
        let path_key = relative.to_lowercase();
        let Some(previous) = self.tracked.remove(&path_key) else {
            return Ok(());
        };
        self.tombstones.record(&path_key);

        let message = SyncMessage::FileDeleted { relative_path: relative.clone(), is_directory: previous.is_directory };
        for peer in self.eligible_peers().await {
            if let Err(err) = self.send_to_peer(&peer, &message).await {
                warn!(peer = %peer.id, %err, "failed to propagate deletion");
            }
        }
        self.emit(EngineEvent::FileChanged { relative_path: relative });
        Ok(())
    }

    async fn handle_local_rename(&self, from: &Path, to: &Path) -> SyncResult<()> {
        let from_relative = self.relative_path_of(from)?;
        let from_key = from_relative.to_lowercase();
        let Some(previous) = self.tracked.remove(&from_key) else {
            return self.handle_local_change(to).await;
        };

        let to_relative = self.relative_path_of(to)?;
        let to_key = to_relative.to_lowercase();

        let (content_hash, size, last_modified) = if previous.is_directory {
            (String::new(), 0, Utc::now())
        } else {
            match std::fs::metadata(to) {
                Ok(metadata) => {
                    let hash = hash_file(to)?;
                    let modified = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
                    (hash, metadata.len(), modified)
                }
                Err(_) => (previous.content_hash.clone(), previous.size, previous.last_modified),
            }
        };

        let new_file = TrackedFile {
            relative_path: to_relative.clone(),
            content_hash,
            size,
            last_modified,
            is_directory: previous.is_directory,
            origin: self.local_id.clone(),
        };
        self.tracked.insert(new_file);
        self.tombstones.record(&from_key);
        self.tombstones.forget(&to_key);

        let message = SyncMessage::FileRenamed { old_path: from_relative, new_path: to_relative.clone() };
        for peer in self.eligible_peers().await {
            if let Err(err) = self.send_to_peer(&peer, &message).await {
                warn!(peer = %peer.id, %err, "failed to propagate rename");
            }
        }
        self.emit(EngineEvent::FileChanged { relative_path: to_relative });
        Ok(())
    }

    /// Send a single file's current content to one peer, using a delta
    /// transfer when the peer plausibly already has a prior copy and the
    /// file is large enough to be worth diffing.
    async fn send_file_update(&self, peer: &PeerRecord, file: &TrackedFile, allow_delta: bool) -> SyncResult<()> {
        let threshold = self.settings.lock().delta_threshold_bytes;
        self.emit(EngineEvent::TransferStarted { relative_path: file.relative_path.clone(), peer: peer.id.clone() });

        if allow_delta && file.size >= threshold {
            match self.try_delta_update(peer, file).await {
                Ok(sent_bytes) => {
                    self.record_transfer(sent_bytes);
                    self.emit(EngineEvent::TransferCompleted { relative_path: file.relative_path.clone(), peer: peer.id.clone() });
                    return Ok(());
                }
                Err(err) => {
                    debug!(peer = %peer.id, %err, "delta transfer failed, falling back to full content");
                }
            }
        }

        let abs_path = self.sync_root().join(&file.relative_path);
        let bytes = std::fs::read(&abs_path)?;
        self.emit(EngineEvent::TransferProgress { relative_path: file.relative_path.clone(), bytes_done: bytes.len() as u64, bytes_total: bytes.len() as u64 });
        let sent_bytes = bytes.len() as u64;
        self.send_to_peer(peer, &SyncMessage::FileChanged { header: file.clone(), bytes }).await?;
        self.record_transfer(sent_bytes);
        self.emit(EngineEvent::TransferCompleted { relative_path: file.relative_path.clone(), peer: peer.id.clone() });
        Ok(())
    }

    /// Bump the session byte counter and refresh the last-sync timestamp;
    /// called on every transfer this host completes, inbound or outbound.
    fn record_transfer(&self, bytes: u64) {
        self.session_bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        *self.last_sync_time.lock() = Some(Utc::now());
    }

    /// Ask `peer` for the block signatures of its current copy, then send
    /// it only the instructions needed to turn that copy into our new
    /// one. Only one such exchange is ever outstanding at a time: the
    /// watcher loop awaits each event fully before starting the next, and
    /// `SyncMessage::BlockSignatures` carries no path of its own to
    /// disambiguate concurrent requests.
    async fn try_delta_update(&self, peer: &PeerRecord, file: &TrackedFile) -> SyncResult<u64> {
        let (tx, rx) = oneshot::channel();
        *self.pending_signatures.lock() = Some((file.path_key(), tx));

        if let Err(err) = self.send_to_peer(peer, &SyncMessage::RequestSignatures { relative_path: file.relative_path.clone() }).await {
            self.pending_signatures.lock().take();
            return Err(err);
        }

        let blocks = match tokio::time::timeout(self.config.delta_signature_timeout, rx).await {
            Ok(Ok(blocks)) => blocks,
            _ => {
                self.pending_signatures.lock().take();
                return Err(SyncError::HashMismatch { relative_path: file.relative_path.clone() });
            }
        };

        let abs_path = self.sync_root().join(&file.relative_path);
        let instructions = compute_delta(&abs_path, &blocks)?;
        let wire_bytes = instructions
            .iter()
            .map(|instr| match instr {
                DeltaInstruction::Copy { .. } => 16,
                DeltaInstruction::Insert { bytes, .. } => bytes.len() as u64,
            })
            .sum();
        let message = SyncMessage::DeltaData { relative_path: file.relative_path.clone(), instructions };
        self.send_to_peer(peer, &message).await?;
        Ok(wire_bytes)
    }

    /// Rebuild the tracked-file map from disk, diffing against the
    /// previous contents to recover any local changes made while the
    /// watcher was not running (startup, or between watchers across a
    /// `set_sync_folder` call).
    async fn full_rescan(&self) -> SyncResult<()> {
        let sync_root = self.sync_root();
        let mut fresh_cache = self.cache.lock().clone();
        let fresh_tracked = TrackedMap::new();
        {
            let ignore_rules = IgnoreRules::load(&sync_root, self.settings.lock().excluded_subtrees.clone());
            scan_sync_folder(&sync_root, &ignore_rules, &mut fresh_cache, &fresh_tracked, &self.local_id)?;
            *self.ignore_rules.lock() = ignore_rules;
        }
        *self.cache.lock() = fresh_cache;

        let new_snapshot = fresh_tracked.snapshot();
        let previous = self.tracked.replace_all(new_snapshot.clone());

        let mut new_by_key = std::collections::HashMap::new();
        for file in &new_snapshot {
            new_by_key.insert(file.path_key(), file.clone());
        }

        // Paths present before the rescan but gone now were deleted while
        // the watcher was down; tombstone and propagate them.
        for (path_key, old_file) in &previous {
            if !new_by_key.contains_key(path_key) {
                self.tombstones.record(path_key);
                let message = SyncMessage::FileDeleted {
                    relative_path: old_file.relative_path.clone(),
                    is_directory: old_file.is_directory,
                };
                for peer in self.eligible_peers().await {
                    if let Err(err) = self.send_to_peer(&peer, &message).await {
                        warn!(peer = %peer.id, %err, "failed to propagate rescan-detected deletion");
                    }
                }
            }
        }

        // New or changed paths are propagated like any other local change.
        for file in &new_snapshot {
            let path_key = file.path_key();
            let changed = match previous.get(&path_key) {
                Some(old) => old.content_hash != file.content_hash,
                None => true,
            };
            if !changed || file.is_directory {
                continue;
            }
            self.tombstones.forget(&path_key);
            let allow_delta = previous.contains_key(&path_key);
            for peer in self.eligible_peers().await {
                if let Err(err) = self.send_file_update(&peer, file, allow_delta).await {
                    warn!(peer = %peer.id, %err, "failed to propagate rescan-detected change");
                }
            }
        }

        self.emit(EngineEvent::SyncStatusChanged(SyncStatus::Idle));
        Ok(())
    }

    /// §5: "manifest exchange 30 s per peer, abort channel on exceed" —
    /// a peer that doesn't drain its manifest within the bound loses its
    /// pooled channel rather than stalling the whole broadcast.
    const MANIFEST_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

    async fn broadcast_manifest(&self) {
        let files = self.tracked.snapshot();
        let message = SyncMessage::Manifest { files };
        for peer in self.eligible_peers().await {
            let addr = peer_address(&peer);
            match tokio::time::timeout(Self::MANIFEST_EXCHANGE_TIMEOUT, self.send_to_peer(&peer, &message)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(peer = %peer.id, %err, "failed to send manifest"),
                Err(_) => {
                    warn!(peer = %peer.id, "manifest exchange exceeded 30s, dropping channel");
                    self.pool.release(addr).await;
                }
            }
        }
        *self.last_sync_time.lock() = Some(Utc::now());
    }

    // ---- inbound message dispatch --------------------------------------

    async fn dispatch(&self, sender: &PeerId, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::Manifest { files } => self.handle_manifest(sender, files).await,
            SyncMessage::FileChanged { header, bytes } => self.handle_file_changed(sender, header, bytes).await,
            SyncMessage::FileDeleted { relative_path, is_directory } => {
                self.handle_delete(sender, relative_path, is_directory).await
            }
            SyncMessage::DirCreated { relative_path } => self.handle_dir_created(sender, relative_path).await,
            SyncMessage::DirDeleted { relative_path } => self.handle_delete(sender, relative_path, true).await,
            SyncMessage::FileRenamed { old_path, new_path } => self.handle_file_renamed(sender, old_path, new_path).await,
            SyncMessage::RequestFile { relative_path } => self.handle_request_file(sender, relative_path).await,
            SyncMessage::RequestSignatures { relative_path } => self.handle_request_signatures(sender, relative_path).await,
            SyncMessage::BlockSignatures { base_hash, blocks } => self.handle_block_signatures(base_hash, blocks),
            SyncMessage::DeltaData { relative_path, instructions } => {
                self.handle_delta_data(sender, relative_path, instructions).await
            }
        }
    }

    async fn sender_record(&self, sender: &PeerId) -> Option<PeerRecord> {
        self.discovery.peer(sender).await
    }

    async fn handle_manifest(&self, sender: &PeerId, files: Vec<TrackedFile>) -> SyncResult<()> {
        let Some(peer) = self.sender_record(sender).await else {
            return Ok(());
        };

        let remote_by_key: std::collections::HashMap<String, TrackedFile> =
            files.into_iter().map(|f| (f.path_key(), f)).collect();

        for (path_key, remote_file) in &remote_by_key {
            if self.tombstones.contains(path_key) {
                let message = if remote_file.is_directory {
                    SyncMessage::DirDeleted { relative_path: remote_file.relative_path.clone() }
                } else {
                    SyncMessage::FileDeleted { relative_path: remote_file.relative_path.clone(), is_directory: false }
                };
                let _ = self.send_to_peer(&peer, &message).await;
                continue;
            }

            match self.tracked.get(path_key) {
                Some(local) if local.content_hash == remote_file.content_hash || local.is_directory => {}
                Some(_) => {
                    // Diverges: pull full content and let `handle_file_changed`
                    // run conflict resolution once it arrives.
                    let _ = self
                        .send_to_peer(&peer, &SyncMessage::RequestFile { relative_path: remote_file.relative_path.clone() })
                        .await;
                }
                None if remote_file.is_directory => {
                    let abs_path = self.sync_root().join(&remote_file.relative_path);
                    std::fs::create_dir_all(&abs_path)?;
                    self.tracked.insert(remote_file.clone());
                }
                None => {
                    let _ = self
                        .send_to_peer(&peer, &SyncMessage::RequestFile { relative_path: remote_file.relative_path.clone() })
                        .await;
                }
            }
        }

        // Files we have that the sender's manifest doesn't mention: push
        // them unconditionally. We cannot see the sender's own tombstone
        // set, so correctness here relies on the receiver's
        // tombstone-on-receipt check rather than on this branch.
        for local in self.tracked.snapshot() {
            let path_key = local.path_key();
            if remote_by_key.contains_key(&path_key) || self.tombstones.contains(&path_key) {
                continue;
            }
            if local.is_directory {
                let _ = self.send_to_peer(&peer, &SyncMessage::DirCreated { relative_path: local.relative_path.clone() }).await;
            } else if let Err(err) = self.send_file_update(&peer, &local, true).await {
                debug!(peer = %peer.id, %err, "failed to push manifest-divergent file");
            }
        }

        Ok(())
    }

    async fn handle_file_changed(&self, sender: &PeerId, header: TrackedFile, bytes: Vec<u8>) -> SyncResult<()> {
        let path_key = header.path_key();
        let Some(peer) = self.sender_record(sender).await else {
            return Ok(());
        };

        if self.tombstones.contains(&path_key) {
            let _ = self
                .send_to_peer(&peer, &SyncMessage::FileDeleted { relative_path: header.relative_path.clone(), is_directory: false })
                .await;
            return Ok(());
        }

        // AEAD only guarantees the bytes weren't altered in transit, not
        // that they match what the sender declared. A single corrupt
        // record must never propagate to disk (§8): verify the payload
        // against its declared hash, request one resend on mismatch, and
        // surface `TransferFailed` if the resend mismatches too.
        if hash_bytes(&bytes) != header.content_hash {
            let already_retried = self.pending_hash_retry.lock().remove(&path_key);
            if already_retried {
                warn!(peer = %sender, path = %header.relative_path, "hash mismatch persisted after resend");
                self.emit(EngineEvent::TransferFailed {
                    relative_path: header.relative_path.clone(),
                    peer: sender.clone(),
                    reason: "received payload hash did not match declared hash, twice".to_string(),
                });
                return Err(SyncError::HashMismatch { relative_path: header.relative_path });
            }
            warn!(peer = %sender, path = %header.relative_path, "hash mismatch on received payload, requesting resend");
            self.pending_hash_retry.lock().insert(path_key.clone());
            let _ = self
                .send_to_peer(&peer, &SyncMessage::RequestFile { relative_path: header.relative_path.clone() })
                .await;
            return Ok(());
        }
        self.pending_hash_retry.lock().remove(&path_key);

        let abs_path = self.sync_root().join(&header.relative_path);
        let existing = self.tracked.get(&path_key);

        if let Some(local) = &existing {
            if !local.is_directory && local.content_hash == header.content_hash {
                return Ok(()); // already in sync, no-op
            }
            if !local.is_directory && local.content_hash != header.content_hash && local.origin != *sender {
                let input = ConflictInput {
                    relative_path: &header.relative_path,
                    local_modified: local.last_modified,
                    remote_modified: header.last_modified,
                    local_peer: &local.origin,
                    remote_peer: sender,
                    now: Utc::now(),
                };
                let mode = self.settings.lock().conflict_mode;
                let (resolution, winner) = resolve(mode, &input);
                self.emit(EngineEvent::ActivityLog {
                    relative_path: header.relative_path.clone(),
                    winner,
                    method: "conflict",
                    peer: Some(sender.clone()),
                });
                return self.apply_conflict(sender, &peer, header, bytes, resolution).await;
            }
        }

        self.record_transfer(bytes.len() as u64);
        self.write_and_track(&abs_path, &header, &bytes, sender)?;
        self.emit(EngineEvent::FileChanged { relative_path: header.relative_path });
        Ok(())
    }

    async fn apply_conflict(
        &self,
        sender: &PeerId,
        peer: &PeerRecord,
        header: TrackedFile,
        bytes: Vec<u8>,
        resolution: Resolution,
    ) -> SyncResult<()> {
        let abs_path = self.sync_root().join(&header.relative_path);
        match resolution {
            Resolution::AcceptRemote { version_local_first } => {
                if version_local_first {
                    if self.create_version(&header.relative_path, &abs_path, VersionReason::Conflict, None)?.is_none() {
                        return Ok(()); // aborted: versioning required but failed
                    }
                }
                self.record_transfer(bytes.len() as u64);
                self.write_and_track(&abs_path, &header, &bytes, sender)?;
                self.emit(EngineEvent::FileChanged { relative_path: header.relative_path });
                Ok(())
            }
            Resolution::KeepLocal { echo_back } => {
                if echo_back {
                    if let Some(local) = self.tracked.get(&header.path_key()) {
                        let _ = self.send_file_update(peer, &local, false).await;
                    }
                }
                Ok(())
            }
            Resolution::KeepBothSideBySide { conflict_name } => {
                let side_by_side_path = self.sync_root().join(&conflict_name);
                self.echo.register(&side_by_side_path);
                if let Some(parent) = side_by_side_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&side_by_side_path, &bytes)?;
                let side_file = TrackedFile {
                    relative_path: conflict_name.clone(),
                    content_hash: header.content_hash,
                    size: header.size,
                    last_modified: header.last_modified,
                    is_directory: false,
                    origin: sender.clone(),
                };
                self.tracked.insert(side_file);
                self.emit(EngineEvent::FileChanged { relative_path: conflict_name });
                Ok(())
            }
            Resolution::AwaitUserChoice => {
                self.emit(EngineEvent::ConflictNeedsResolution { relative_path: header.relative_path, peer: sender.clone() });
                Ok(())
            }
        }
    }

    fn write_and_track(&self, abs_path: &Path, header: &TrackedFile, bytes: &[u8], sender: &PeerId) -> SyncResult<()> {
        self.echo.register(abs_path);
        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(abs_path, bytes)?;
        let path_key = header.path_key();
        self.cache.lock().update(path_key.clone(), header.content_hash.clone(), header.size, header.last_modified);
        self.tracked.insert(TrackedFile { origin: sender.clone(), ..header.clone() });
        self.tombstones.forget(&path_key);
        Ok(())
    }

    async fn handle_dir_created(&self, sender: &PeerId, relative_path: String) -> SyncResult<()> {
        let path_key = relative_path.to_lowercase();
        if self.tombstones.contains(&path_key) {
            if let Some(peer) = self.sender_record(sender).await {
                let _ = self.send_to_peer(&peer, &SyncMessage::DirDeleted { relative_path: relative_path.clone() }).await;
            }
            return Ok(());
        }

        let abs_path = self.sync_root().join(&relative_path);
        std::fs::create_dir_all(&abs_path)?;
        self.tracked.insert(TrackedFile {
            relative_path: relative_path.clone(),
            content_hash: String::new(),
            size: 0,
            last_modified: Utc::now(),
            is_directory: true,
            origin: sender.clone(),
        });
        self.tombstones.forget(&path_key);
        self.emit(EngineEvent::FileChanged { relative_path });
        Ok(())
    }

    async fn handle_delete(&self, sender: &PeerId, relative_path: String, is_directory: bool) -> SyncResult<()> {
        let path_key = relative_path.to_lowercase();
        let abs_path = self.sync_root().join(&relative_path);

        // If absent locally, this is a no-op: nothing to version, remove, or
        // track, and nothing to tell other peers about.
        let Some(existing) = self.tracked.get(&path_key) else {
            return Ok(());
        };

        if !existing.is_directory {
            if self.create_version(&relative_path, &abs_path, VersionReason::BeforeDelete, Some(sender.clone()))?.is_none() {
                return Ok(()); // aborted: versioning required but failed
            }
        }

        self.echo.register(&abs_path);
        let removed = if is_directory {
            std::fs::remove_dir_all(&abs_path)
        } else {
            std::fs::remove_file(&abs_path)
        };
        if let Err(err) = removed {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }

        self.tracked.remove(&path_key);
        self.cache.lock().remove(&path_key);
        self.tombstones.record(&path_key);
        self.emit(EngineEvent::FileChanged { relative_path });
        Ok(())
    }

    async fn handle_file_renamed(&self, sender: &PeerId, old_path: String, new_path: String) -> SyncResult<()> {
        let old_key = old_path.to_lowercase();
        let new_key = new_path.to_lowercase();

        if self.tombstones.contains(&new_key) {
            if let Some(peer) = self.sender_record(sender).await {
                let _ = self.send_to_peer(&peer, &SyncMessage::FileDeleted { relative_path: new_path.clone(), is_directory: false }).await;
            }
            return Ok(());
        }

        let old_abs = self.sync_root().join(&old_path);
        let new_abs = self.sync_root().join(&new_path);
        let previous = self.tracked.remove(&old_key);

        self.echo.register(&old_abs);
        self.echo.register(&new_abs);
        if old_abs.exists() {
            if let Some(parent) = new_abs.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&old_abs, &new_abs)?;
        } else if !new_abs.exists() {
            if let Some(peer) = self.sender_record(sender).await {
                let _ = self.send_to_peer(&peer, &SyncMessage::RequestFile { relative_path: new_path.clone() }).await;
            }
        }

        if let Some(previous) = previous {
            self.tracked.insert(TrackedFile { relative_path: new_path.clone(), origin: sender.clone(), ..previous });
        }
        self.tombstones.record(&old_key);
        self.tombstones.forget(&new_key);
        self.emit(EngineEvent::FileChanged { relative_path: new_path });
        Ok(())
    }

    async fn handle_request_file(&self, sender: &PeerId, relative_path: String) -> SyncResult<()> {
        let Some(peer) = self.sender_record(sender).await else {
            return Ok(());
        };
        let path_key = relative_path.to_lowercase();
        let Some(file) = self.tracked.get(&path_key) else {
            let _ = self.send_to_peer(&peer, &SyncMessage::FileDeleted { relative_path, is_directory: false }).await;
            return Ok(());
        };
        self.send_file_update(&peer, &file, false).await
    }

    async fn handle_request_signatures(&self, sender: &PeerId, relative_path: String) -> SyncResult<()> {
        let Some(peer) = self.sender_record(sender).await else {
            return Ok(());
        };
        let abs_path = self.sync_root().join(&relative_path);
        let path_key = relative_path.to_lowercase();
        let base_hash = self.tracked.get(&path_key).map(|f| f.content_hash).unwrap_or_default();
        let blocks = compute_signatures(&abs_path)?;
        self.send_to_peer(&peer, &SyncMessage::BlockSignatures { base_hash, blocks }).await
    }

    fn handle_block_signatures(&self, _base_hash: String, blocks: Vec<BlockSignature>) -> SyncResult<()> {
        if let Some((_path_key, tx)) = self.pending_signatures.lock().take() {
            let _ = tx.send(blocks);
        } else {
            debug!("received unsolicited BlockSignatures, discarding");
        }
        Ok(())
    }

    async fn handle_delta_data(
        &self,
        sender: &PeerId,
        relative_path: String,
        instructions: Vec<DeltaInstruction>,
    ) -> SyncResult<()> {
        let path_key = relative_path.to_lowercase();
        let abs_path = self.sync_root().join(&relative_path);
        let tmp_path = abs_path.with_extension("swarm-delta-tmp");

        let wire_bytes = instructions
            .iter()
            .map(|instr| match instr {
                DeltaInstruction::Copy { .. } => 16,
                DeltaInstruction::Insert { bytes, .. } => bytes.len() as u64,
            })
            .sum();
        apply_delta(&abs_path, &tmp_path, &instructions)?;
        self.record_transfer(wire_bytes);
        self.echo.register(&abs_path);
        std::fs::rename(&tmp_path, &abs_path)?;

        let metadata = std::fs::metadata(&abs_path)?;
        let content_hash = hash_file(&abs_path)?;
        let last_modified = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        let file = TrackedFile {
            relative_path: relative_path.clone(),
            content_hash,
            size: metadata.len(),
            last_modified,
            is_directory: false,
            origin: sender.clone(),
        };
        self.cache.lock().update(path_key.clone(), file.content_hash.clone(), file.size, file.last_modified);
        self.tracked.insert(file);
        self.tombstones.forget(&path_key);
        self.emit(EngineEvent::FileChanged { relative_path });
        Ok(())
    }

    /// Archive the current on-disk content before it is about to be
    /// overwritten or deleted. Returns `Ok(None)` (and the caller must
    /// abort the apply) when versioning is required but the archive
    /// write failed; returns `Ok(Some(()))` when the apply may proceed
    /// (either the archive succeeded, versioning is disabled, or the
    /// failure is tolerated).
    fn create_version(
        &self,
        relative_path: &str,
        abs_path: &Path,
        reason: VersionReason,
        source_peer: Option<PeerId>,
    ) -> SyncResult<Option<()>> {
        let (enabled, required) = {
            let settings = self.settings.lock();
            (settings.versioning.enabled, settings.versioning.required)
        };
        if !enabled {
            return Ok(Some(()));
        }
        let Ok(current_bytes) = std::fs::read(abs_path) else {
            return Ok(Some(())); // nothing on disk yet to archive
        };

        match self.versioning.lock().create_version(relative_path, &current_bytes, reason, source_peer) {
            Ok(_) => Ok(Some(())),
            Err(err) => {
                warn!(%err, path = relative_path, "failed to archive version before apply");
                if required {
                    self.emit(EngineEvent::Error(format!("aborting apply for {relative_path}: {err}")));
                    Ok(None)
                } else {
                    Ok(Some(()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_uses_advertised_transfer_port_not_broadcast_source() {
        let record = PeerRecord {
            id: PeerId::from_public_key(b"peer"),
            name: "peer".to_string(),
            last_seen: Utc::now(),
            address: "192.168.1.20:54321".parse().unwrap(),
            transfer_port: 9001,
            sync_enabled: true,
            public_key: Vec::new(),
            trusted: true,
        };
        assert_eq!(peer_address(&record), "192.168.1.20:9001".parse().unwrap());
    }

    #[test]
    fn versions_dir_matches_watch_ignore_policy_default() {
        let root = Path::new("/tmp/sync");
        assert_eq!(versions_dir(root), root.join(".swarm-versions"));
        assert_eq!(VERSIONS_DIR_NAME, swarm_watch::IgnorePolicy::default().versions_dir_name);
    }
}
