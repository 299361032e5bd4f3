//! Transport façade: bootstrap, dispatch, and lifecycle callbacks.
//!
//! A transport owns one multiplexer and one connection manager. It is the
//! only component the embedding application talks to: it opens the
//! multiplexer, drives the datagram dispatch loop, walks the bootstrap
//! candidate list, and surfaces connection lifecycle events upward.
//!
//! Transports are shared-ownership objects: outstanding completion
//! handlers hold them alive, so every closure scheduled onto the executor
//! captures a `Weak` back-reference and gives up silently once the
//! application has dropped its last strong handle.

use crate::connection::{
    ConnectRequest, Connection, ConnectionFactory, ConnectionHandlers, ConnectionPtr,
    ConnectionState, OnClose, OnConnect, PingHandler, SentHandler,
};
use crate::connection_manager::ConnectionManager;
use crate::endpoint::{self, Contact};
use crate::error::{AdmitOutcome, Result, RudpError};
use crate::executor::Executor;
use crate::nat::{NatState, NatType};
use crate::node_id::{NodeId, PublicKey};
use crate::parameters::Parameters;
use crate::socket::Socket;
use rudp_transport::Multiplexer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// Message delivery callback: `(peer_id, message)`.
pub type OnMessage = Arc<dyn Fn(NodeId, Vec<u8>) + Send + Sync>;

/// Fired exactly once per non-duplicate admission, temporaries included:
/// `(peer_id, transport, is_temporary, connection)`.
pub type OnConnectionAdded =
    Arc<dyn Fn(NodeId, Arc<Transport>, bool, ConnectionPtr) + Send + Sync>;

/// Fired exactly once per non-duplicate removal:
/// `(peer_id, transport, is_temporary, timed_out)`.
pub type OnConnectionLost = Arc<dyn Fn(NodeId, Arc<Transport>, bool, bool) + Send + Sync>;

/// Raised when a peer asks this node to probe its NAT mapping:
/// `(peer_id, endpoint_to_probe)`.
pub type OnNatDetectionRequested = Arc<dyn Fn(NodeId, SocketAddr) + Send + Sync>;

/// Receives the bootstrap outcome: the chosen contact, or `None` when the
/// attempt was legitimately skipped (bootstrapping off an existing
/// connection behind symmetric NAT).
pub type OnBootstrap = Box<dyn FnOnce(Result<Option<Contact>>) + Send>;

/// Receives each outbound connect attempt's resolution.
pub type ConnectHandler = Arc<dyn Fn(Result<()>) + Send + Sync>;

/// Application callbacks installed at bootstrap.
pub struct BootstrapCallbacks {
    /// Message delivery.
    pub on_message: OnMessage,
    /// Connection admission.
    pub on_connection_added: OnConnectionAdded,
    /// Connection loss.
    pub on_connection_lost: OnConnectionLost,
    /// NAT detection requests from peers. Must be supplied.
    pub on_nat_detection_requested: OnNatDetectionRequested,
}

#[derive(Default)]
struct Callbacks {
    on_message: Option<OnMessage>,
    on_connection_added: Option<OnConnectionAdded>,
    on_connection_lost: Option<OnConnectionLost>,
}

/// One RUDP transport: a multiplexer, a connection manager, and the
/// executor that serializes all work touching them.
pub struct Transport {
    self_weak: Weak<Transport>,
    executor: Executor,
    multiplexer: Arc<dyn Multiplexer>,
    connection_manager: Arc<ConnectionManager>,
    callbacks: Mutex<Callbacks>,
    on_nat_detection_requested: Mutex<Option<OnNatDetectionRequested>>,
    nat_state: NatState,
    parameters: Parameters,
}

impl Transport {
    /// Create a transport over `multiplexer`, minting connections through
    /// `factory`.
    ///
    /// The multiplexer stays unopened until [`bootstrap`](Self::bootstrap).
    ///
    /// # Panics
    /// Panics outside a Tokio runtime context.
    #[must_use]
    pub fn new(
        multiplexer: Arc<dyn Multiplexer>,
        factory: Arc<dyn ConnectionFactory>,
        nat_state: NatState,
        this_node_id: NodeId,
        this_public_key: PublicKey,
        parameters: Parameters,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Transport>| {
            let executor = Executor::new();
            let connection_manager = Arc::new(ConnectionManager::new(
                weak.clone(),
                executor.clone(),
                Arc::clone(&multiplexer),
                this_node_id,
                this_public_key,
                factory,
                parameters.clone(),
            ));
            Self {
                self_weak: weak.clone(),
                executor,
                multiplexer,
                connection_manager,
                callbacks: Mutex::new(Callbacks::default()),
                on_nat_detection_requested: Mutex::new(None),
                nat_state,
                parameters,
            }
        })
    }

    /// The connection manager owned by this transport.
    #[must_use]
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// This transport's executor.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Open the multiplexer on `local_endpoint`, install the application
    /// callbacks, start dispatching, and walk the bootstrap candidates in
    /// order.
    ///
    /// The outcome is reported through `on_bootstrap` on the executor: the
    /// winning contact, `Ok(None)` when the attempt was skipped, or
    /// [`RudpError::NotConnectable`] once the list is exhausted.
    pub async fn bootstrap(
        &self,
        candidates: Vec<Contact>,
        local_endpoint: SocketAddr,
        bootstrap_off_existing_connection: bool,
        callbacks: BootstrapCallbacks,
        on_bootstrap: OnBootstrap,
    ) {
        if let Err(error) = self.multiplexer.open(local_endpoint).await {
            tracing::error!("failed to open multiplexer: {error}");
            self.executor.dispatch(async move {
                on_bootstrap(Err(RudpError::FailedToOpen(error.to_string())));
            });
            return;
        }

        // Installed before anything else runs so that every later slot
        // invocation can rely on them being present.
        {
            let mut installed = self.callbacks.lock().expect("callback lock poisoned");
            installed.on_message = Some(callbacks.on_message);
            installed.on_connection_added = Some(callbacks.on_connection_added);
            installed.on_connection_lost = Some(callbacks.on_connection_lost);
        }
        *self
            .on_nat_detection_requested
            .lock()
            .expect("callback lock poisoned") = Some(callbacks.on_nat_detection_requested);

        #[cfg(debug_assertions)]
        {
            let local = self.multiplexer.local_endpoint();
            let external = self.multiplexer.external_endpoint();
            for candidate in &candidates {
                debug_assert!(
                    local != candidate.endpoints.local && local != candidate.endpoints.external,
                    "bootstrapping to own local endpoint"
                );
                debug_assert!(
                    external.is_none()
                        || (external != candidate.endpoints.local
                            && external != candidate.endpoints.external),
                    "bootstrapping to own external endpoint"
                );
            }
        }

        self.start_dispatch();
        self.try_bootstrapping(candidates, bootstrap_off_existing_connection, on_bootstrap);
    }

    fn try_bootstrapping(
        &self,
        candidates: Vec<Contact>,
        bootstrap_off_existing_connection: bool,
        on_bootstrap: OnBootstrap,
    ) {
        // A fresh bootstrap keeps its connection alive briefly so the
        // network can reciprocate; a probe off an existing connection is
        // connect-and-drop.
        let lifespan = if bootstrap_off_existing_connection {
            Duration::ZERO
        } else {
            self.parameters.bootstrap_connection_lifespan
        };

        if bootstrap_off_existing_connection && self.nat_state.get() == NatType::Symmetric {
            tracing::debug!("behind symmetric NAT; skipping bootstrap attempt");
            self.executor.dispatch(async move {
                on_bootstrap(Ok(None));
            });
            return;
        }

        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            let result = Self::run_bootstrap_attempts(&weak, candidates, lifespan).await;
            if let Some(transport) = weak.upgrade() {
                transport.executor.dispatch(async move {
                    on_bootstrap(result);
                });
            }
        });
    }

    async fn run_bootstrap_attempts(
        weak: &Weak<Transport>,
        candidates: Vec<Contact>,
        lifespan: Duration,
    ) -> Result<Option<Contact>> {
        for candidate in candidates {
            let Some(transport) = weak.upgrade() else {
                return Err(RudpError::NotConnectable);
            };
            let Some(peer_endpoint) = candidate
                .endpoints
                .external
                .filter(|e| endpoint::is_valid(*e))
            else {
                tracing::error!("bootstrap candidate {} has no valid endpoint", candidate.id);
                continue;
            };
            match transport
                .connect_to_bootstrap_endpoint(&candidate, peer_endpoint, lifespan)
                .await
            {
                Ok(()) => {
                    transport.detect_nat_type(candidate.id).await;
                    return Ok(Some(candidate));
                }
                Err(error) => {
                    tracing::debug!("bootstrap attempt to {} failed: {error}", candidate.id);
                }
            }
        }
        Err(RudpError::NotConnectable)
    }

    async fn connect_to_bootstrap_endpoint(
        &self,
        candidate: &Contact,
        peer_endpoint: SocketAddr,
        lifespan: Duration,
    ) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let default_on_connect = self.default_on_connect();
        let handlers = ConnectionHandlers {
            on_connect: Box::new(move |result, connection| {
                if result.is_ok() {
                    default_on_connect(Ok(()), connection);
                }
                let _ = done_tx.send(result);
            }),
            on_close: self.default_on_close(),
        };
        let request = ConnectRequest {
            peer_id: candidate.id,
            peer_endpoint,
            peer_public_key: candidate.public_key,
            validation_data: Vec::new(),
            attempt_timeout: self.parameters.bootstrap_connect_timeout,
            lifespan,
        };
        self.connection_manager.connect(request, handlers, None);
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(RudpError::FailedToConnect),
        }
    }

    /// Ping the chosen bootstrap peer's NAT-detection endpoint; a failed
    /// ping means this node's port mapping is per-destination.
    async fn detect_nat_type(&self, peer_id: NodeId) {
        let Some(endpoint) = self
            .connection_manager
            .remote_nat_detection_endpoint(&peer_id)
        else {
            return;
        };
        if !endpoint::is_valid(endpoint) {
            return;
        }
        let (result_tx, result_rx) = oneshot::channel();
        self.connection_manager.ping(
            peer_id,
            endpoint,
            Box::new(move |code| {
                let _ = result_tx.send(code);
            }),
        );
        if !matches!(result_rx.await, Ok(0)) {
            tracing::info!("NAT detection ping failed; local NAT is symmetric");
            self.nat_state.set(NatType::Symmetric);
        }
    }

    /// Arm the dispatch loop: receive datagrams off the multiplexer and
    /// route each through the connection manager on the executor. Closing
    /// the multiplexer is the sole termination condition.
    fn start_dispatch(&self) {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            loop {
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                let multiplexer = Arc::clone(&transport.multiplexer);
                drop(transport);

                match multiplexer.next_datagram().await {
                    Ok((datagram, from)) => {
                        let Some(transport) = weak.upgrade() else {
                            return;
                        };
                        let weak_self = weak.clone();
                        transport.executor.dispatch(async move {
                            if let Some(transport) = weak_self.upgrade() {
                                transport.handle_datagram(&datagram, from);
                            }
                        });
                    }
                    Err(error) => {
                        tracing::trace!("multiplexer receive ended: {error}");
                    }
                }
                // Whatever the outcome, rearm while the multiplexer is open.
                if !multiplexer.is_open() {
                    return;
                }
            }
        });
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        if let Some(socket) = self.connection_manager.get_socket(datagram, from) {
            socket.handle_received(datagram, from);
        }
    }

    /// Standard connect-completion handler: admit on success.
    #[must_use]
    pub fn default_on_connect(&self) -> OnConnect {
        let weak = self.self_weak.clone();
        Box::new(move |result, connection| {
            if result.is_ok() {
                if let Some(transport) = weak.upgrade() {
                    transport.add_connection(connection);
                }
            }
        })
    }

    /// Standard close handler: withdraw the connection, flagging timeouts.
    #[must_use]
    pub fn default_on_close(&self) -> OnClose {
        let weak = self.self_weak.clone();
        Box::new(move |error, connection| {
            if let Some(transport) = weak.upgrade() {
                let timed_out = error.as_ref().is_some_and(RudpError::is_timeout);
                transport.remove_connection(connection, timed_out);
            }
        })
    }

    /// The default connect/close handler pair.
    #[must_use]
    pub fn default_handlers(&self) -> ConnectionHandlers {
        ConnectionHandlers {
            on_connect: self.default_on_connect(),
            on_close: self.default_on_close(),
        }
    }

    /// Admit `connection` and announce it upward.
    ///
    /// Temporary connections bypass the registry but are still announced;
    /// duplicates are logged and silently ignored; invalid states are
    /// closed.
    pub fn add_connection(&self, connection: ConnectionPtr) {
        let state = connection.state();
        let peer_id = connection.socket().peer_node_id();
        if state != ConnectionState::Temporary {
            match self.connection_manager.add_connection(connection.clone()) {
                AdmitOutcome::InvalidConnection => {
                    tracing::error!(
                        "failed to add {state} connection from {} to {peer_id}",
                        self.this_debug_id()
                    );
                    connection.close();
                    return;
                }
                AdmitOutcome::AlreadyExists => {
                    tracing::warn!(
                        "{state} connection from {} to {peer_id} is a duplicate, ignoring",
                        self.this_debug_id()
                    );
                    return;
                }
                AdmitOutcome::Admitted => {}
            }
        }

        tracing::debug!(
            "made {state} connection from {} to {peer_id}",
            self.this_debug_id()
        );

        let callback = self
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .on_connection_added
            .clone();
        if let (Some(callback), Some(transport)) = (callback, self.self_weak.upgrade()) {
            callback(
                peer_id,
                transport,
                state == ConnectionState::Temporary,
                connection,
            );
        }
    }

    /// Withdraw `connection` and announce the loss upward.
    ///
    /// Duplicates were never announced, so their removal is silent.
    pub fn remove_connection(&self, connection: ConnectionPtr, timed_out: bool) {
        let state = connection.state();
        if state == ConnectionState::Duplicate {
            return;
        }
        if state.is_normal() {
            self.connection_manager.remove_connection(&connection);
        }

        tracing::debug!(
            "removed {state} connection from {} to {} (timed_out: {timed_out})",
            self.this_debug_id(),
            connection.socket().peer_node_id()
        );

        let callback = self
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .on_connection_lost
            .clone();
        if let (Some(callback), Some(transport)) = (callback, self.self_weak.upgrade()) {
            callback(
                connection.socket().peer_node_id(),
                transport,
                state == ConnectionState::Temporary,
                timed_out,
            );
        }
    }

    /// Deliver an inbound message to the application.
    ///
    /// Called by the reliability engine from the executor; delivery order
    /// per peer follows executor order.
    pub fn handle_message(&self, peer_id: NodeId, message: Vec<u8>) {
        let callback = self
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .on_message
            .clone();
        if let Some(callback) = callback {
            callback(peer_id, message);
        }
    }

    /// Relay a peer's NAT-detection request to the application.
    pub fn request_nat_detection(&self, peer_id: NodeId, endpoint: SocketAddr) {
        let callback = self
            .on_nat_detection_requested
            .lock()
            .expect("callback lock poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(peer_id, endpoint);
        }
    }

    /// Connect to `peer`, racing its external and local endpoints.
    ///
    /// The external endpoint is attempted first; when that attempt
    /// resolves and the multiplexer is still open, the local endpoint is
    /// attempted as well. Both attempts funnel into `handler`.
    pub fn connect(&self, peer: Contact, handler: ConnectHandler) {
        let weak = self.self_weak.clone();
        self.executor.dispatch(async move {
            if let Some(transport) = weak.upgrade() {
                transport.do_connect(peer, handler);
            }
        });
    }

    fn do_connect(&self, peer: Contact, handler: ConnectHandler) {
        if !self.multiplexer.is_open() {
            handler(Err(RudpError::FailedToConnect));
            return;
        }
        let external = peer
            .endpoints
            .external
            .filter(|e| endpoint::is_valid(*e));
        let local = peer.endpoints.local.filter(|e| endpoint::is_valid(*e));

        match (external, local) {
            (Some(external), Some(local)) if external != local => {
                self.start_connect_attempt(peer, external, handler, Some(local));
            }
            (Some(endpoint), _) | (None, Some(endpoint)) => {
                self.start_connect_attempt(peer, endpoint, handler, None);
            }
            (None, None) => handler(Err(RudpError::FailedToConnect)),
        }
    }

    fn start_connect_attempt(
        &self,
        peer: Contact,
        peer_endpoint: SocketAddr,
        handler: ConnectHandler,
        follow_up: Option<SocketAddr>,
    ) {
        let weak = self.self_weak.clone();
        let handlers = ConnectionHandlers {
            on_connect: Box::new(move |result, connection| {
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                if result.is_ok() {
                    transport.add_connection(connection);
                }
                handler(result);
                if let Some(local) = follow_up {
                    if transport.multiplexer.is_open() {
                        transport.start_connect_attempt(peer, local, Arc::clone(&handler), None);
                    }
                }
            }),
            on_close: self.default_on_close(),
        };
        let request = ConnectRequest {
            peer_id: peer.id,
            peer_endpoint,
            peer_public_key: peer.public_key,
            validation_data: Vec::new(),
            attempt_timeout: self.parameters.rendezvous_connect_timeout,
            lifespan: Parameters::INFINITE_LIFESPAN,
        };
        self.connection_manager.connect(request, handlers, None);
    }

    /// Schedule a close of the connection to `peer_id`.
    pub fn close_connection(&self, peer_id: &NodeId) -> bool {
        self.connection_manager.close_connection(peer_id)
    }

    /// Queue a message for `peer_id`.
    pub fn send(&self, peer_id: &NodeId, message: Vec<u8>, handler: SentHandler) -> bool {
        self.connection_manager.send(peer_id, message, handler)
    }

    /// Ping `peer_endpoint` as `peer_id`.
    pub fn ping(&self, peer_id: NodeId, peer_endpoint: SocketAddr, handler: PingHandler) {
        self.connection_manager.ping(peer_id, peer_endpoint, handler);
    }

    /// Snapshot lookup of the connection to `peer_id`.
    #[must_use]
    pub fn get_connection(&self, peer_id: &NodeId) -> Option<ConnectionPtr> {
        self.connection_manager.get_connection(peer_id)
    }

    /// The multiplexer's bound local endpoint.
    #[must_use]
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.multiplexer.local_endpoint()
    }

    /// This node's external endpoint as currently believed.
    #[must_use]
    pub fn external_endpoint(&self) -> Option<SocketAddr> {
        self.multiplexer.external_endpoint()
    }

    /// This node's endpoint as observed by `peer_id`.
    #[must_use]
    pub fn this_endpoint_as_seen_by_peer(&self, peer_id: &NodeId) -> Option<SocketAddr> {
        self.connection_manager.this_endpoint(peer_id)
    }

    /// Record the best current guess of this node's external endpoint.
    pub fn set_best_guess_external_endpoint(&self, endpoint: SocketAddr) {
        self.connection_manager
            .set_best_guess_external_endpoint(endpoint);
    }

    /// Number of registered connections.
    #[must_use]
    pub fn normal_connections_count(&self) -> usize {
        self.connection_manager.normal_connections_count()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.connection_manager.normal_connections_count() == 0
    }

    /// Whether this transport has a usable endpoint.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.multiplexer
            .external_endpoint()
            .is_some_and(endpoint::is_valid)
            || self
                .multiplexer
                .local_endpoint()
                .is_some_and(endpoint::is_valid)
    }

    /// This node's identity.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.connection_manager.node_id()
    }

    /// Close the transport: silence the application callbacks, fan out
    /// close to every connection, and close the multiplexer. Idempotent.
    pub fn close(&self) {
        {
            let mut callbacks = self.callbacks.lock().expect("callback lock poisoned");
            *callbacks = Callbacks::default();
        }
        let connection_manager = Arc::clone(&self.connection_manager);
        let multiplexer = Arc::clone(&self.multiplexer);
        self.executor.dispatch(async move {
            connection_manager.close();
            multiplexer.close().await;
        });
    }

    fn this_debug_id(&self) -> String {
        format!(
            "[{} - {:?} / {:?}]",
            self.node_id(),
            self.multiplexer.external_endpoint(),
            self.multiplexer.local_endpoint()
        )
    }

    /// Multi-line diagnostic dump of this transport and its connections.
    #[must_use]
    pub fn debug_string(&self) -> String {
        format!(
            "\t{}  {}\n{}",
            self.this_debug_id(),
            self.nat_state.get(),
            self.connection_manager.debug_string()
        )
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
