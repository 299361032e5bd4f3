//! Endpoint predicates and contact records.

use crate::node_id::{NodeId, PublicKey};
use std::net::{IpAddr, SocketAddr};

/// Whether `endpoint` can be used as a peer address: a specified IP and a
/// nonzero port.
#[must_use]
pub fn is_valid(endpoint: SocketAddr) -> bool {
    endpoint.port() != 0 && !endpoint.ip().is_unspecified()
}

/// Whether `endpoint` sits on a private network: loopback, RFC1918 space,
/// or link-local.
///
/// Endpoint repair and `make_connection_permanent` both refuse to treat a
/// private address as a peer's externally reachable endpoint.
#[must_use]
pub fn on_private_network(endpoint: SocketAddr) -> bool {
    match endpoint.ip() {
        IpAddr::V4(ip) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        IpAddr::V6(ip) => ip.is_loopback() || (ip.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// A peer's local and externally observed endpoints, either of which may
/// be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointPair {
    /// Address on the peer's own network.
    pub local: Option<SocketAddr>,
    /// Address as seen from outside the peer's NAT.
    pub external: Option<SocketAddr>,
}

impl EndpointPair {
    /// A pair where both endpoints are known.
    #[must_use]
    pub fn new(local: SocketAddr, external: SocketAddr) -> Self {
        Self {
            local: Some(local),
            external: Some(external),
        }
    }

    /// A pair with only the external endpoint known.
    #[must_use]
    pub fn external_only(external: SocketAddr) -> Self {
        Self {
            local: None,
            external: Some(external),
        }
    }
}

/// Everything needed to attempt a connection to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    /// The peer's identity.
    pub id: NodeId,
    /// Where the peer can be reached.
    pub endpoints: EndpointPair,
    /// The peer's public key.
    pub public_key: PublicKey,
}
