//! Directed-broadcast address enumeration for every local IPv4 interface,
//! used alongside the limited broadcast address so discovery reaches peers
//! on networks where `255.255.255.255` is dropped by a router.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The universal limited-broadcast address.
pub const LIMITED_BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Every local IPv4 interface's `/N` directed broadcast address, skipping
/// loopback and interfaces with no IPv4 address.
#[must_use]
pub fn directed_broadcast_addresses(port: u16) -> Vec<SocketAddr> {
    pnet_datalink::interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .filter_map(|network| match network {
            IpNetwork::V4(v4) => Some(SocketAddr::new(IpAddr::V4(v4.broadcast()), port)),
            IpNetwork::V6(_) => None,
        })
        .collect()
}

/// All destinations a broadcast should be sent to: the limited broadcast
/// address plus every interface's directed broadcast.
#[must_use]
pub fn broadcast_destinations(port: u16) -> Vec<SocketAddr> {
    let mut out = vec![SocketAddr::new(IpAddr::V4(LIMITED_BROADCAST), port)];
    out.extend(directed_broadcast_addresses(port));
    out
}
