//! Signed LAN broadcast peer discovery for `swarm-sync`: periodic presence
//! announcements, inbound verification, and a TTL-bounded peer table.

pub mod error;
pub mod events;
pub mod interfaces;
pub mod manager;
pub mod message;
pub mod trust;

pub use error::{DiscoveryError, DiscoveryResult};
pub use events::DiscoveryEvent;
pub use manager::{DISCOVERY_PORT, DiscoveryManager, LocalAnnouncement, PEER_TTL};
pub use trust::{NoTrust, TrustStore};
