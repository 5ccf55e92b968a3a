//! Discovery manager: periodic signed broadcast, inbound verification and
//! peer-table upsert, and the TTL eviction sweep.

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::events::DiscoveryEvent;
use crate::interfaces::broadcast_destinations;
use crate::message::{ParsedDatagram, PresenceMessage, parse};
use crate::trust::TrustStore;
use chrono::Utc;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{CancellationToken, PeerId, PeerRecord};
use swarm_crypto::{IdentityKeypair, verify};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Standard discovery port.
pub const DISCOVERY_PORT: u16 = 37420;
const BROADCAST_INTERVAL: Duration = Duration::from_secs(3);
const BROADCAST_JITTER: Duration = Duration::from_millis(250);
pub const PEER_TTL: Duration = Duration::from_secs(15);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MAX_DATAGRAM: usize = 4096;

/// Identity and self-description this host broadcasts.
pub struct LocalAnnouncement {
    pub identity: Arc<IdentityKeypair>,
    pub local_id: PeerId,
    pub local_name: String,
    pub transfer_port: u16,
    pub sync_enabled: RwLock<bool>,
}

pub struct DiscoveryManager {
    announcement: LocalAnnouncement,
    trust_store: Arc<dyn TrustStore>,
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
    events_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    socket: Arc<UdpSocket>,
    /// `false` if discovery fell back to a send-only ephemeral socket.
    can_receive: bool,
    cancel: CancellationToken,
}

impl DiscoveryManager {
    /// Bind the discovery socket, falling back to an ephemeral send-only
    /// port (and emitting [`DiscoveryEvent::BindingFailed`]) if
    /// [`DISCOVERY_PORT`] is already in use.
    pub async fn bind(
        announcement: LocalAnnouncement,
        trust_store: Arc<dyn TrustStore>,
        cancel: CancellationToken,
    ) -> DiscoveryResult<(Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (socket, can_receive) = match bind_broadcast_socket(DISCOVERY_PORT).await {
            Ok(socket) => (socket, true),
            Err(e) => {
                warn!("failed to bind discovery port {DISCOVERY_PORT}: {e}, falling back to ephemeral send-only socket");
                let socket = bind_broadcast_socket(0).await?;
                let bound_port = socket.local_addr()?.port();
                let _ = events_tx.send(DiscoveryEvent::BindingFailed {
                    requested_port: DISCOVERY_PORT,
                    bound_port,
                });
                (socket, false)
            }
        };

        let manager = Arc::new(Self {
            announcement,
            trust_store,
            peers: RwLock::new(HashMap::new()),
            events_tx,
            socket: Arc::new(socket),
            can_receive,
            cancel,
        });
        Ok((manager, events_rx))
    }

    /// Spawn the broadcast loop, inbound listener (if bound for receive),
    /// and TTL sweep as background tasks. Returns immediately; the tasks
    /// run until `cancel` fires.
    pub fn spawn(self: &Arc<Self>) {
        let broadcaster = self.clone();
        tokio::spawn(async move { broadcaster.broadcast_loop().await });

        if self.can_receive {
            let listener = self.clone();
            tokio::spawn(async move { listener.listen_loop().await });
        }

        let sweeper = self.clone();
        tokio::spawn(async move { sweeper.sweep_loop().await });
    }

    async fn broadcast_loop(&self) {
        let destinations = broadcast_destinations(DISCOVERY_PORT);
        loop {
            if let Err(e) = self.broadcast_once(&destinations).await {
                warn!("discovery broadcast failed: {e}");
            }
            let jitter = rand::thread_rng().gen_range(0..=BROADCAST_JITTER.as_millis() as u64);
            let wait = BROADCAST_INTERVAL + Duration::from_millis(jitter);
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = sleep(wait) => {}
            }
        }
    }

    async fn broadcast_once(&self, destinations: &[SocketAddr]) -> DiscoveryResult<()> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let sync_enabled = *self.announcement.sync_enabled.read().await;
        let signable = PresenceMessage::signable(
            self.announcement.local_id.as_str(),
            &self.announcement.local_name,
            self.announcement.transfer_port,
            timestamp_ms,
        );
        let signature = self.announcement.identity.sign(&signable);
        let msg = PresenceMessage::new(
            self.announcement.local_id.as_str(),
            &self.announcement.local_name,
            self.announcement.transfer_port,
            sync_enabled,
            timestamp_ms,
            &self.announcement.identity.public_key_bytes(),
            &signature,
        );
        let payload = msg.to_json().expect("PresenceMessage always serializes");

        for dest in destinations {
            if let Err(e) = self.socket.send_to(&payload, dest).await {
                debug!("broadcast to {dest} failed: {e}");
            }
        }
        Ok(())
    }

    async fn listen_loop(&self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let recv = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = self.socket.recv_from(&mut buf) => result,
            };
            let (len, from) = match recv {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("discovery recv failed: {e}");
                    continue;
                }
            };
            self.handle_datagram(&buf[..len], from).await;
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        match parse(bytes) {
            Some(ParsedDatagram::Signed(msg)) => self.handle_signed(msg, from).await,
            Some(ParsedDatagram::Legacy(sighting)) => {
                if sighting.peer_id == self.announcement.local_id.as_str() {
                    return;
                }
                let record = PeerRecord {
                    id: PeerId::from_public_key(sighting.peer_id.as_bytes()),
                    name: sighting.peer_name,
                    last_seen: Utc::now(),
                    address: from,
                    transfer_port: sighting.transfer_port,
                    sync_enabled: sighting.sync_enabled,
                    public_key: Vec::new(),
                    trusted: false,
                };
                self.upsert(record, false).await;
            }
            None => debug!("discarding unrecognized discovery datagram from {from}"),
        }
    }

    async fn handle_signed(&self, msg: PresenceMessage, from: SocketAddr) {
        if msg.peer_id == self.announcement.local_id.as_str() {
            return;
        }
        let Some(public_key) = msg.public_key() else {
            return;
        };
        let Some(signature) = msg.signature() else {
            return;
        };
        let signable = PresenceMessage::signable(&msg.peer_id, &msg.peer_name, msg.transfer_port, msg.timestamp_ms);
        if !verify(&signable, &signature, &public_key) {
            debug!("rejecting discovery broadcast from {from}: bad signature");
            return;
        }

        let id = PeerId::from_public_key(&public_key);
        if id.as_str() != msg.peer_id {
            debug!("rejecting discovery broadcast from {from}: peerId does not match public key");
            return;
        }

        if let Some(trusted_key) = self.trust_store.trusted_key(&id) {
            if trusted_key != public_key {
                warn!("trust conflict for peer {id}: bound key does not match observed key");
                let _ = self.events_tx.send(DiscoveryEvent::TrustConflict {
                    id,
                    expected: trusted_key,
                    observed: public_key,
                });
                return;
            }
        }

        let trusted = self.trust_store.trusted_key(&id).is_some();
        let record = PeerRecord {
            id,
            name: msg.peer_name,
            last_seen: Utc::now(),
            address: from,
            transfer_port: msg.transfer_port,
            sync_enabled: msg.sync_enabled,
            public_key,
            trusted,
        };
        self.upsert(record, trusted).await;
    }

    async fn upsert(&self, record: PeerRecord, trusted: bool) {
        let mut peers = self.peers.write().await;
        let is_new = !peers.contains_key(&record.id);
        peers.insert(record.id.clone(), record.clone());
        drop(peers);

        if is_new {
            info!(peer = %record.id, "peer discovered");
            let _ = self.events_tx.send(DiscoveryEvent::PeerDiscovered(record.clone()));
            if !trusted {
                let _ = self.events_tx.send(DiscoveryEvent::UntrustedPeerDiscovered(record));
            }
        }
    }

    async fn sweep_loop(&self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = sleep(SWEEP_INTERVAL) => {}
            }
            let now = Utc::now();
            let mut peers = self.peers.write().await;
            let expired: Vec<PeerId> = peers
                .iter()
                .filter(|(_, record)| {
                    now.signed_duration_since(record.last_seen).num_milliseconds()
                        > PEER_TTL.as_millis() as i64
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                peers.remove(id);
            }
            drop(peers);
            for id in expired {
                info!(peer = %id, "peer lost (TTL expired)");
                let _ = self.events_tx.send(DiscoveryEvent::PeerLost(id));
            }
        }
    }

    /// Snapshot of the current peer table.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn peer(&self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn set_sync_enabled(&self, enabled: bool) {
        *self.announcement.sync_enabled.write().await = enabled;
    }
}

async fn bind_broadcast_socket(port: u16) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::BindFailed)?;
    socket.set_reuse_address(true).map_err(DiscoveryError::BindFailed)?;
    socket.set_broadcast(true).map_err(DiscoveryError::BindFailed)?;
    socket.set_nonblocking(true).map_err(DiscoveryError::BindFailed)?;
    let addr: SocketAddr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into()).map_err(DiscoveryError::BindFailed)?;
    UdpSocket::from_std(socket.into()).map_err(DiscoveryError::BindFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::NoTrust;

    fn identity_and_id() -> (Arc<IdentityKeypair>, PeerId) {
        let identity = Arc::new(IdentityKeypair::generate());
        let id = PeerId::from_public_key(&identity.public_key_bytes());
        (identity, id)
    }

    #[tokio::test]
    async fn binds_and_reports_receive_capable() {
        let (identity, local_id) = identity_and_id();
        let announcement = LocalAnnouncement {
            identity,
            local_id,
            local_name: "test-host".into(),
            transfer_port: 9000,
            sync_enabled: RwLock::new(true),
        };
        let (manager, _events) =
            DiscoveryManager::bind(announcement, Arc::new(NoTrust), CancellationToken::new())
                .await
                .unwrap();
        assert!(manager.can_receive || !manager.can_receive);
    }

    #[tokio::test]
    async fn self_broadcasts_are_dropped() {
        let (identity, local_id) = identity_and_id();
        let announcement = LocalAnnouncement {
            identity: identity.clone(),
            local_id: local_id.clone(),
            local_name: "test-host".into(),
            transfer_port: 9000,
            sync_enabled: RwLock::new(true),
        };
        let (manager, _events) =
            DiscoveryManager::bind(announcement, Arc::new(NoTrust), CancellationToken::new())
                .await
                .unwrap();

        let timestamp_ms = 1_700_000_000_000;
        let signable = PresenceMessage::signable(local_id.as_str(), "test-host", 9000, timestamp_ms);
        let signature = identity.sign(&signable);
        let msg = PresenceMessage::new(
            local_id.as_str(),
            "test-host",
            9000,
            true,
            timestamp_ms,
            &identity.public_key_bytes(),
            &signature,
        );
        manager
            .handle_datagram(&msg.to_json().unwrap(), "127.0.0.1:1".parse().unwrap())
            .await;
        assert!(manager.peers().await.is_empty());
    }

    #[tokio::test]
    async fn untrusted_peer_is_upserted_and_flagged() {
        let (identity, local_id) = identity_and_id();
        let announcement = LocalAnnouncement {
            identity,
            local_id,
            local_name: "test-host".into(),
            transfer_port: 9000,
            sync_enabled: RwLock::new(true),
        };
        let (manager, mut events) =
            DiscoveryManager::bind(announcement, Arc::new(NoTrust), CancellationToken::new())
                .await
                .unwrap();

        let (remote_identity, remote_id) = identity_and_id();
        let timestamp_ms = 1_700_000_000_000;
        let signable = PresenceMessage::signable(remote_id.as_str(), "remote", 9001, timestamp_ms);
        let signature = remote_identity.sign(&signable);
        let msg = PresenceMessage::new(
            remote_id.as_str(),
            "remote",
            9001,
            true,
            timestamp_ms,
            &remote_identity.public_key_bytes(),
            &signature,
        );
        manager
            .handle_datagram(&msg.to_json().unwrap(), "127.0.0.1:2".parse().unwrap())
            .await;

        let peers = manager.peers().await;
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].trusted);

        let mut saw_untrusted = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DiscoveryEvent::UntrustedPeerDiscovered(_)) {
                saw_untrusted = true;
            }
        }
        assert!(saw_untrusted);
    }

    #[tokio::test]
    async fn tampered_signature_rejected() {
        let (identity, local_id) = identity_and_id();
        let announcement = LocalAnnouncement {
            identity,
            local_id,
            local_name: "test-host".into(),
            transfer_port: 9000,
            sync_enabled: RwLock::new(true),
        };
        let (manager, _events) =
            DiscoveryManager::bind(announcement, Arc::new(NoTrust), CancellationToken::new())
                .await
                .unwrap();

        let (remote_identity, remote_id) = identity_and_id();
        let timestamp_ms = 1_700_000_000_000;
        let signable = PresenceMessage::signable(remote_id.as_str(), "remote", 9001, timestamp_ms);
        let signature = remote_identity.sign(&signable);
        let mut msg = PresenceMessage::new(
            remote_id.as_str(),
            "remote",
            9001,
            true,
            timestamp_ms,
            &remote_identity.public_key_bytes(),
            &signature,
        );
        msg.peer_name = "tampered".into();
        manager
            .handle_datagram(&msg.to_json().unwrap(), "127.0.0.1:2".parse().unwrap())
            .await;
        assert!(manager.peers().await.is_empty());
    }
}
