//! The per-connection reliability engine seam.

use crate::node_id::{NodeId, PublicKey};
use std::net::SocketAddr;
use std::sync::Arc;

/// The per-connection sliding-window engine, as seen by the core.
///
/// One socket exists per connection attempt, registered in the socket
/// registry from creation until destruction. The core never looks inside
/// its reliability machinery; it only routes datagrams to it and reads the
/// peer attributes below.
pub trait Socket: Send + Sync {
    /// Identity of the peer this socket talks to.
    fn peer_node_id(&self) -> NodeId;

    /// The peer's public key.
    fn peer_public_key(&self) -> PublicKey;

    /// The endpoint this socket currently sends to.
    fn peer_endpoint(&self) -> SocketAddr;

    /// Repoint the socket at a newly observed peer endpoint.
    ///
    /// Only the symmetric-NAT repair path calls this, and only before the
    /// socket is connected.
    fn update_peer_endpoint(&self, endpoint: SocketAddr);

    /// Whether the handshake has completed.
    fn is_connected(&self) -> bool;

    /// This node's endpoint as observed by the peer, once known.
    fn this_endpoint(&self) -> Option<SocketAddr>;

    /// The endpoint the peer offers for NAT-detection pings, if any.
    fn remote_nat_detection_endpoint(&self) -> Option<SocketAddr>;

    /// Feed an inbound datagram to the engine.
    ///
    /// Called from the executor by the dispatch path after demultiplexing.
    fn handle_received(&self, datagram: &[u8], from: SocketAddr);
}

/// Shared handle to a socket.
pub type SocketHandle = Arc<dyn Socket>;
