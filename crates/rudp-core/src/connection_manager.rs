//! Connection registry and datagram demultiplexing.
//!
//! The connection manager owns the set of live connections for one
//! transport, the socket registry behind them, and the policy that routes
//! every inbound datagram to exactly one of: an existing socket, a pending
//! connect attempt, the ping responder, or the floor.
//!
//! # Locking
//!
//! Public entry points are callable from any thread, so registry
//! membership sits behind a mutex. The mutex guards the set only: lookups
//! copy the shared connection handle and release the lock before any
//! connection method runs, and mutations of connection state are always
//! scheduled on the transport's executor.

use crate::connection::{
    ConnectRequest, Connection, ConnectionFactory, ConnectionHandlers, ConnectionPtr,
    FailureHandler, PingHandler, SentHandler, same_connection,
};
use crate::endpoint;
use crate::error::AdmitOutcome;
use crate::executor::Executor;
use crate::node_id::{NodeId, PublicKey};
use crate::packet::{self, ConnectionReason, HandshakePacket, Inspected};
use crate::parameters::Parameters;
use crate::socket::{Socket, SocketHandle};
use crate::socket_registry::SocketRegistry;
use crate::transport::Transport;
use rudp_transport::Multiplexer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

/// The set of live connections, logically keyed by peer node id.
///
/// Linear scan is deliberate: membership is bounded by
/// [`Parameters::MAX_CONNECTIONS`].
#[derive(Default)]
struct ConnectionRegistry {
    connections: Vec<ConnectionPtr>,
}

impl ConnectionRegistry {
    fn find(&self, peer_id: &NodeId) -> Option<&ConnectionPtr> {
        self.connections
            .iter()
            .find(|connection| connection.socket().peer_node_id() == *peer_id)
    }

    /// Insert `connection` iff its state is normal. A second insert for
    /// the same peer is a caller bug; callers consult `find` first.
    fn add(&mut self, connection: ConnectionPtr) -> bool {
        if !connection.state().is_normal() {
            return false;
        }
        debug_assert!(
            self.find(&connection.socket().peer_node_id()).is_none(),
            "duplicate admission for peer {}",
            connection.socket().peer_node_id()
        );
        self.connections.push(connection);
        true
    }

    fn remove(&mut self, connection: &ConnectionPtr) {
        self.connections.retain(|c| !same_connection(c, connection));
    }

    fn len(&self) -> usize {
        self.connections.len()
    }
}

/// Public façade over the connection and socket registries of one
/// transport.
///
/// All methods are safe from any thread; every effect on a connection is
/// scheduled on the transport's executor.
pub struct ConnectionManager {
    connections: Mutex<ConnectionRegistry>,
    sockets: SocketRegistry,
    transport: Weak<Transport>,
    executor: Executor,
    multiplexer: Arc<dyn Multiplexer>,
    this_node_id: NodeId,
    this_public_key: PublicKey,
    factory: Arc<dyn ConnectionFactory>,
    parameters: Parameters,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Weak<Transport>,
        executor: Executor,
        multiplexer: Arc<dyn Multiplexer>,
        this_node_id: NodeId,
        this_public_key: PublicKey,
        factory: Arc<dyn ConnectionFactory>,
        parameters: Parameters,
    ) -> Self {
        Self {
            connections: Mutex::new(ConnectionRegistry::default()),
            sockets: SocketRegistry::new(),
            transport,
            executor,
            multiplexer,
            this_node_id,
            this_public_key,
            factory,
            parameters,
        }
    }

    /// Schedule `close` for every registered connection.
    ///
    /// Membership is not mutated here; removal is driven by the close
    /// callbacks as each connection winds down.
    pub fn close(&self) {
        let connections: Vec<_> = self
            .connections
            .lock()
            .expect("connection registry lock poisoned")
            .connections
            .clone();
        for connection in connections {
            self.executor.dispatch(async move { connection.close() });
        }
    }

    /// Materialize a new pending connection and start it connecting.
    ///
    /// Silently dropped if the owning transport is already gone.
    pub fn connect(
        &self,
        request: ConnectRequest,
        handlers: ConnectionHandlers,
        failure: Option<FailureHandler>,
    ) {
        if self.transport.upgrade().is_none() {
            return;
        }
        let connection = self.factory.new_connection();
        self.executor.dispatch(async move {
            connection.start_connecting(request, handlers, failure);
        });
    }

    /// Offer a connection for registry admission.
    ///
    /// The connection must no longer be pending. Admission succeeds iff
    /// the state is normal and the peer is not yet registered.
    pub fn add_connection(&self, connection: ConnectionPtr) -> AdmitOutcome {
        assert!(
            connection.state() != crate::connection::ConnectionState::Pending,
            "pending connection offered for admission"
        );
        let mut registry = self
            .connections
            .lock()
            .expect("connection registry lock poisoned");
        if !connection.state().is_normal() {
            return AdmitOutcome::InvalidConnection;
        }
        if registry.find(&connection.socket().peer_node_id()).is_some() {
            return AdmitOutcome::AlreadyExists;
        }
        let added = registry.add(connection);
        debug_assert!(added);
        AdmitOutcome::Admitted
    }

    /// Schedule a close of the connection to `peer_id`.
    ///
    /// Returns whether a connection was found; the registry entry is
    /// removed later, by the close callback.
    pub fn close_connection(&self, peer_id: &NodeId) -> bool {
        let connection = {
            let registry = self
                .connections
                .lock()
                .expect("connection registry lock poisoned");
            match registry.find(peer_id) {
                Some(connection) => connection.clone(),
                None => {
                    tracing::warn!("not currently connected to {peer_id}");
                    return false;
                }
            }
        };
        self.executor.dispatch(async move { connection.close() });
        true
    }

    /// Erase a connection from the registry. Must only be called for a
    /// connection in a normal state.
    pub fn remove_connection(&self, connection: &ConnectionPtr) {
        debug_assert!(connection.state().is_normal());
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .remove(connection);
    }

    /// Snapshot lookup of the connection to `peer_id`.
    #[must_use]
    pub fn get_connection(&self, peer_id: &NodeId) -> Option<ConnectionPtr> {
        let registry = self
            .connections
            .lock()
            .expect("connection registry lock poisoned");
        let connection = registry.find(peer_id).cloned();
        if connection.is_none() {
            tracing::debug!("not currently connected to {peer_id}");
        }
        connection
    }

    /// Probe `peer_endpoint` with a transient ping connection.
    ///
    /// The connection never enters the registry; the result code flows to
    /// `handler`.
    pub fn ping(&self, peer_id: NodeId, peer_endpoint: SocketAddr, handler: PingHandler) {
        if self.transport.upgrade().is_none() {
            return;
        }
        let connection = self.factory.new_connection();
        self.executor.dispatch(async move {
            connection.ping(peer_id, peer_endpoint, handler);
        });
    }

    /// Queue `message` for the connection to `peer_id`.
    ///
    /// Returns `false` for unknown peers and for messages larger than
    /// [`Parameters::MAX_MESSAGE_SIZE`].
    pub fn send(&self, peer_id: &NodeId, message: Vec<u8>, handler: SentHandler) -> bool {
        if message.len() > Parameters::MAX_MESSAGE_SIZE {
            tracing::warn!(
                "rejecting {}-byte message to {peer_id}; limit is {}",
                message.len(),
                Parameters::MAX_MESSAGE_SIZE
            );
            return false;
        }
        let connection = {
            let registry = self
                .connections
                .lock()
                .expect("connection registry lock poisoned");
            match registry.find(peer_id) {
                Some(connection) => connection.clone(),
                None => {
                    tracing::warn!("not currently connected to {peer_id}");
                    return false;
                }
            }
        };
        self.executor.dispatch(async move {
            connection.start_sending(message, handler);
        });
        true
    }

    /// Promote the connection to `peer_id` via `make_permanent`.
    ///
    /// Returns `None` for unknown peers. On success the inner value is the
    /// socket's peer endpoint iff that endpoint is not on a private
    /// network.
    pub fn make_connection_permanent(
        &self,
        peer_id: &NodeId,
        validated: bool,
    ) -> Option<Option<SocketAddr>> {
        let connection = {
            let registry = self
                .connections
                .lock()
                .expect("connection registry lock poisoned");
            match registry.find(peer_id) {
                Some(connection) => connection.clone(),
                None => {
                    tracing::warn!("not currently connected to {peer_id}");
                    return None;
                }
            }
        };
        connection.make_permanent(validated);
        let peer_endpoint = connection.socket().peer_endpoint();
        if endpoint::on_private_network(peer_endpoint) {
            Some(None)
        } else {
            Some(Some(peer_endpoint))
        }
    }

    /// This node's endpoint as observed by `peer_id`, if known.
    #[must_use]
    pub fn this_endpoint(&self, peer_id: &NodeId) -> Option<SocketAddr> {
        self.get_connection(peer_id)
            .and_then(|connection| connection.socket().this_endpoint())
    }

    /// The NAT-detection endpoint reported by `peer_id`'s socket, if any.
    #[must_use]
    pub fn remote_nat_detection_endpoint(&self, peer_id: &NodeId) -> Option<SocketAddr> {
        self.get_connection(peer_id)
            .and_then(|connection| connection.socket().remote_nat_detection_endpoint())
    }

    /// Forward the best external-endpoint guess to the multiplexer.
    pub fn set_best_guess_external_endpoint(&self, endpoint: SocketAddr) {
        self.multiplexer.set_best_guess_external_endpoint(endpoint);
    }

    /// Register a socket, returning its freshly allocated id.
    pub fn add_socket(&self, socket: SocketHandle) -> u32 {
        self.sockets.insert(socket)
    }

    /// Deregister a socket. A no-op for id `0`.
    pub fn remove_socket(&self, id: u32) {
        self.sockets.remove(id);
    }

    /// Number of registered (normal) connections.
    #[must_use]
    pub fn normal_connections_count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .len()
    }

    /// This node's identity.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.this_node_id
    }

    /// This node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.this_public_key
    }

    /// Route an inbound datagram to the socket that should process it.
    ///
    /// Implements the demultiplexer policy: routed packets go by socket
    /// id; unrouted `Normal` handshakes match by exact source endpoint
    /// first and fall back to symmetric-NAT repair; unrouted non-`Normal`
    /// handshakes from strangers become bootstrap or ping responses.
    pub fn get_socket(&self, datagram: &[u8], from: SocketAddr) -> Option<SocketHandle> {
        if self.sockets.is_empty() {
            return None;
        }

        match packet::inspect(datagram) {
            Inspected::NotRudp => {
                tracing::debug!("dropping non-RUDP datagram from {from}");
                None
            }
            Inspected::ForSocket(socket_id) => {
                let socket = self.sockets.lookup(socket_id);
                if socket.is_none() {
                    tracing::info!("datagram for unknown socket {socket_id} from {from}");
                }
                socket
            }
            Inspected::Handshake(handshake) => {
                if handshake.reason == ConnectionReason::Normal {
                    if let Some(socket) = self.sockets.find_by_peer_endpoint(from) {
                        return Some(socket);
                    }
                    // No exact match: a peer behind symmetric NAT may be
                    // arriving on a port other than the one advertised.
                    let repaired = self.sockets.find_repair_candidate(from);
                    if let Some(socket) = &repaired {
                        tracing::debug!(
                            "updating peer endpoint from {} to {from}",
                            socket.peer_endpoint()
                        );
                        socket.update_peer_endpoint(from);
                    }
                    repaired
                } else {
                    match self.sockets.find_by_peer_endpoint(from) {
                        Some(socket) => {
                            // The peer is replying to this node's ping or
                            // join attempt.
                            Some(socket)
                        }
                        None => {
                            self.handle_ping_from(&handshake, from);
                            None
                        }
                    }
                }
            }
        }
    }

    /// React to an unrouted non-`Normal` handshake from a stranger: a
    /// peer pinging this node or joining the network through it.
    pub fn handle_ping_from(&self, handshake: &HandshakePacket, from: SocketAddr) {
        if handshake.node_id == self.this_node_id {
            tracing::warn!("{} is handshaking with another local transport", self.this_node_id);
            return;
        }
        if !endpoint::is_valid(from) {
            return;
        }

        let bootstrap_and_drop = handshake.reason == ConnectionReason::BootstrapAndDrop;
        let existing = {
            let registry = self
                .connections
                .lock()
                .expect("connection registry lock poisoned");
            if bootstrap_and_drop {
                None
            } else {
                registry.find(&handshake.node_id).cloned()
            }
        };

        if let Some(connection) = existing {
            // A repeat bootstrap from a connected peer means it restarted:
            // recycle the stale connection.
            tracing::warn!(
                "received another bootstrap connection request from currently connected \
                 peer {} - {from} - closing connection",
                handshake.node_id
            );
            self.executor.dispatch(async move { connection.close() });
            return;
        }

        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let lifespan = if bootstrap_and_drop {
            std::time::Duration::ZERO
        } else {
            self.parameters.bootstrap_connection_lifespan
        };
        let request = ConnectRequest {
            peer_id: handshake.node_id,
            peer_endpoint: from,
            peer_public_key: handshake.public_key,
            validation_data: Vec::new(),
            attempt_timeout: self.parameters.bootstrap_connect_timeout,
            lifespan,
        };
        self.connect(request, transport.default_handlers(), None);
    }

    /// One line per registered connection, for diagnostics.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let registry = self
            .connections
            .lock()
            .expect("connection registry lock poisoned");
        let mut out = String::new();
        for connection in &registry.connections {
            out.push_str(&format!(
                "\t\tpeer {}  {}  expires in {:?}\n",
                connection.socket().peer_node_id(),
                connection.state(),
                connection.expires_from_now()
            ));
        }
        out
    }
}
