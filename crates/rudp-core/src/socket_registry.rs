//! Socket id allocation and lookup.

use crate::endpoint::on_private_network;
use crate::socket::{Socket, SocketHandle};
use dashmap::DashMap;
use std::net::SocketAddr;

/// Bidirectional map between locally minted socket ids and socket objects.
///
/// Id `0` is reserved: it marks a handshake that has not been routed to a
/// socket yet, so it is never allocated and removing it is a no-op. Only
/// executor-scheduled work touches the registry, but the concurrent map
/// keeps that property cheap to uphold.
#[derive(Default)]
pub struct SocketRegistry {
    sockets: DashMap<u32, SocketHandle>,
}

impl SocketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `socket` under a freshly allocated nonzero id.
    ///
    /// Ids are drawn uniformly at random and rejection-sampled against
    /// current membership.
    pub fn insert(&self, socket: SocketHandle) -> u32 {
        loop {
            let id: u32 = rand::random();
            if id == 0 || self.sockets.contains_key(&id) {
                continue;
            }
            self.sockets.insert(id, socket);
            return id;
        }
    }

    /// Erase the socket stored under `id`. A no-op for id `0`.
    pub fn remove(&self, id: u32) {
        if id != 0 {
            self.sockets.remove(&id);
        }
    }

    /// Look up a socket by id.
    #[must_use]
    pub fn lookup(&self, id: u32) -> Option<SocketHandle> {
        self.sockets.get(&id).map(|entry| entry.value().clone())
    }

    /// Find the socket whose peer endpoint equals `endpoint` exactly.
    #[must_use]
    pub fn find_by_peer_endpoint(&self, endpoint: SocketAddr) -> Option<SocketHandle> {
        self.sockets
            .iter()
            .find(|entry| entry.value().peer_endpoint() == endpoint)
            .map(|entry| entry.value().clone())
    }

    /// Find a socket eligible for symmetric-NAT port repair against
    /// `endpoint`: same peer IP address, a peer endpoint that is not on a
    /// private network, and a handshake that has not completed yet.
    #[must_use]
    pub fn find_repair_candidate(&self, endpoint: SocketAddr) -> Option<SocketHandle> {
        self.sockets
            .iter()
            .find(|entry| {
                let peer = entry.value().peer_endpoint();
                peer.ip() == endpoint.ip()
                    && !on_private_network(peer)
                    && !entry.value().is_connected()
            })
            .map(|entry| entry.value().clone())
    }

    /// Whether no sockets are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Number of registered sockets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }
}
