//! Shared test infrastructure: a deterministic mock reliability engine
//! behind the `Socket`/`Connection` seams, plus a transport fixture that
//! records every upward callback.
//!
//! The mock engine speaks just enough protocol for the core's routing to
//! be exercised end-to-end over loopback UDP: a connect registers a
//! socket and sends a handshake; receiving a handshake on an unconnected
//! socket completes it and replies once, so crossing handshakes converge.

#![allow(dead_code)]

use rudp_core::connection::{
    ConnectRequest, Connection, ConnectionFactory, ConnectionHandlers, ConnectionPtr,
    ConnectionState, FailureHandler, OnClose, OnConnect, PingHandler, SentHandler,
};
use rudp_core::endpoint::{Contact, EndpointPair};
use rudp_core::error::RudpError;
use rudp_core::node_id::{NodeId, PublicKey, ID_SIZE};
use rudp_core::packet::{self, ConnectionReason, HandshakePacket, Inspected};
use rudp_core::parameters::Parameters;
use rudp_core::socket::{Socket, SocketHandle};
use rudp_core::transport::{BootstrapCallbacks, Transport};
use rudp_core::nat::NatState;
use rudp_transport::{Multiplexer, UdpMultiplexer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Honour `RUST_LOG` when debugging a failing test.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Parameters shrunk so failure paths resolve quickly under test.
pub fn test_parameters() -> Parameters {
    Parameters {
        bootstrap_connect_timeout: Duration::from_millis(500),
        bootstrap_connection_lifespan: Duration::from_secs(30),
        rendezvous_connect_timeout: Duration::from_secs(1),
    }
}

fn unreachable_endpoint() -> SocketAddr {
    // TEST-NET-1: routable nowhere.
    "192.0.2.1:9".parse().unwrap()
}

// ---------------------------------------------------------------------------
// Mock engine
// ---------------------------------------------------------------------------

pub struct MockSocket {
    connection: Weak<MockConnection>,
    peer_id: RwLock<NodeId>,
    peer_public_key: RwLock<PublicKey>,
    peer_endpoint: RwLock<SocketAddr>,
    this_endpoint: RwLock<Option<SocketAddr>>,
    nat_detection_endpoint: RwLock<Option<SocketAddr>>,
    connected: AtomicBool,
}

impl MockSocket {
    fn set_peer(&self, peer_id: NodeId, public_key: PublicKey, endpoint: SocketAddr) {
        *self.peer_id.write().unwrap() = peer_id;
        *self.peer_public_key.write().unwrap() = public_key;
        *self.peer_endpoint.write().unwrap() = endpoint;
    }

    pub fn set_nat_detection_endpoint(&self, endpoint: SocketAddr) {
        *self.nat_detection_endpoint.write().unwrap() = Some(endpoint);
    }
}

impl Socket for MockSocket {
    fn peer_node_id(&self) -> NodeId {
        *self.peer_id.read().unwrap()
    }

    fn peer_public_key(&self) -> PublicKey {
        *self.peer_public_key.read().unwrap()
    }

    fn peer_endpoint(&self) -> SocketAddr {
        *self.peer_endpoint.read().unwrap()
    }

    fn update_peer_endpoint(&self, endpoint: SocketAddr) {
        *self.peer_endpoint.write().unwrap() = endpoint;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn this_endpoint(&self) -> Option<SocketAddr> {
        *self.this_endpoint.read().unwrap()
    }

    fn remote_nat_detection_endpoint(&self) -> Option<SocketAddr> {
        *self.nat_detection_endpoint.read().unwrap()
    }

    fn handle_received(&self, datagram: &[u8], from: SocketAddr) {
        if let Some(connection) = self.connection.upgrade() {
            connection.on_datagram(datagram.to_vec(), from);
        }
    }
}

pub struct MockConnection {
    self_weak: Weak<MockConnection>,
    transport: Weak<Transport>,
    multiplexer: Arc<dyn Multiplexer>,
    socket: Arc<MockSocket>,
    state: Mutex<ConnectionState>,
    reason: Mutex<ConnectionReason>,
    socket_id: AtomicU32,
    lifespan: Mutex<Duration>,
    deadline: Mutex<Option<Instant>>,
    on_connect: Mutex<Option<OnConnect>>,
    on_close: Mutex<Option<OnClose>>,
    failure: Mutex<Option<FailureHandler>>,
    ping_handler: Mutex<Option<PingHandler>>,
    ping_timeout: Duration,
    request: Mutex<Option<ConnectRequest>>,
    sent_messages: Mutex<Vec<Vec<u8>>>,
    reported_connected: AtomicBool,
    closed: AtomicBool,
}

impl MockConnection {
    fn new(
        transport: Weak<Transport>,
        multiplexer: Arc<dyn Multiplexer>,
        ping_timeout: Duration,
        nat_detection_endpoint: Option<SocketAddr>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<MockConnection>| Self {
            self_weak: weak.clone(),
            transport,
            multiplexer,
            socket: Arc::new(MockSocket {
                connection: weak.clone(),
                peer_id: RwLock::new(NodeId::invalid()),
                peer_public_key: RwLock::new(PublicKey::from_bytes([0; ID_SIZE])),
                peer_endpoint: RwLock::new("0.0.0.0:0".parse().unwrap()),
                this_endpoint: RwLock::new(None),
                nat_detection_endpoint: RwLock::new(nat_detection_endpoint),
                connected: AtomicBool::new(false),
            }),
            state: Mutex::new(ConnectionState::Pending),
            reason: Mutex::new(ConnectionReason::Normal),
            socket_id: AtomicU32::new(0),
            lifespan: Mutex::new(Parameters::INFINITE_LIFESPAN),
            deadline: Mutex::new(None),
            on_connect: Mutex::new(None),
            on_close: Mutex::new(None),
            failure: Mutex::new(None),
            ping_handler: Mutex::new(None),
            ping_timeout,
            request: Mutex::new(None),
            sent_messages: Mutex::new(Vec::new()),
            reported_connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The connect request this connection was started with, if any.
    pub fn recorded_request(&self) -> Option<ConnectRequest> {
        self.request.lock().unwrap().clone()
    }

    /// Messages queued through `start_sending`.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent_messages.lock().unwrap().clone()
    }

    /// The engine socket, for endpoint assertions.
    pub fn mock_socket(&self) -> &Arc<MockSocket> {
        &self.socket
    }

    fn send_handshake(&self, reason: ConnectionReason, to: SocketAddr) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let packet = HandshakePacket {
            node_id: transport.node_id(),
            public_key: transport.connection_manager().public_key(),
            reason,
        };
        let multiplexer = Arc::clone(&self.multiplexer);
        tokio::spawn(async move {
            let _ = multiplexer.send_to(&packet.encode(), to).await;
        });
    }

    fn on_datagram(self: Arc<Self>, datagram: Vec<u8>, _from: SocketAddr) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match packet::inspect(&datagram) {
            Inspected::Handshake(_) => {
                if self.socket.is_connected() {
                    return; // stray handshake on an established engine
                }
                self.socket.connected.store(true, Ordering::SeqCst);
                let reason = *self.reason.lock().unwrap();
                self.send_handshake(reason, self.socket.peer_endpoint());

                let taken_handler = self.ping_handler.lock().unwrap().take();
                if let Some(handler) = taken_handler {
                    handler(0);
                    self.do_close(None);
                    return;
                }
                self.complete_connect();
            }
            Inspected::ForSocket(_) => {
                // Engine data; hand the payload upward.
                if let Some(transport) = self.transport.upgrade() {
                    transport.handle_message(
                        self.socket.peer_node_id(),
                        datagram[packet::HEADER_SIZE..].to_vec(),
                    );
                }
            }
            Inspected::NotRudp => {}
        }
    }

    fn complete_connect(self: Arc<Self>) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let lifespan = *self.lifespan.lock().unwrap();
        let peer_id = self.socket.peer_node_id();

        let state = if transport
            .connection_manager()
            .get_connection(&peer_id)
            .is_some()
        {
            ConnectionState::Duplicate
        } else if lifespan == Duration::ZERO {
            ConnectionState::Temporary
        } else if lifespan == Parameters::INFINITE_LIFESPAN {
            ConnectionState::Unvalidated
        } else {
            ConnectionState::Bootstrapping
        };
        *self.state.lock().unwrap() = state;
        if lifespan != Duration::ZERO && lifespan != Parameters::INFINITE_LIFESPAN {
            *self.deadline.lock().unwrap() = Some(Instant::now() + lifespan);
        }

        self.reported_connected.store(true, Ordering::SeqCst);
        if let Some(on_connect) = self.on_connect.lock().unwrap().take() {
            let ptr: ConnectionPtr = self.clone();
            on_connect(Ok(()), ptr);
        }

        match state {
            // One-shot and superseded connections drop straight away.
            ConnectionState::Temporary | ConnectionState::Duplicate => {
                self.do_close(None);
            }
            _ => {}
        }
    }

    fn fail_attempt(self: Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) || self.socket.is_connected() {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Some(transport) = self.transport.upgrade() {
            transport
                .connection_manager()
                .remove_socket(self.socket_id.load(Ordering::SeqCst));
        }
        if let Some(on_connect) = self.on_connect.lock().unwrap().take() {
            let ptr: ConnectionPtr = self.clone();
            on_connect(Err(RudpError::FailedToConnect), ptr);
        }
        if let Some(failure) = self.failure.lock().unwrap().take() {
            failure();
        }
    }

    fn do_close(self: Arc<Self>, error: Option<RudpError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = self.transport.upgrade() {
            transport
                .connection_manager()
                .remove_socket(self.socket_id.load(Ordering::SeqCst));
        }
        if self.reported_connected.load(Ordering::SeqCst) {
            if let Some(on_close) = self.on_close.lock().unwrap().take() {
                let ptr: ConnectionPtr = self.clone();
                on_close(error, ptr);
            }
        }
    }
}

impl Connection for MockConnection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn socket(&self) -> SocketHandle {
        self.socket.clone()
    }

    fn start_connecting(
        &self,
        request: ConnectRequest,
        handlers: ConnectionHandlers,
        failure: Option<FailureHandler>,
    ) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        *self.request.lock().unwrap() = Some(request.clone());
        *self.lifespan.lock().unwrap() = request.lifespan;
        *self.on_connect.lock().unwrap() = Some(handlers.on_connect);
        *self.on_close.lock().unwrap() = Some(handlers.on_close);
        *self.failure.lock().unwrap() = failure;

        self.socket
            .set_peer(request.peer_id, request.peer_public_key, request.peer_endpoint);
        *self.socket.this_endpoint.write().unwrap() = self.multiplexer.local_endpoint();

        let id = transport.connection_manager().add_socket(self.socket.clone());
        self.socket_id.store(id, Ordering::SeqCst);

        let reason = if request.lifespan == Duration::ZERO {
            ConnectionReason::BootstrapAndDrop
        } else if request.lifespan == Parameters::INFINITE_LIFESPAN {
            ConnectionReason::Normal
        } else {
            ConnectionReason::BootstrapAndKeep
        };
        *self.reason.lock().unwrap() = reason;
        self.send_handshake(reason, request.peer_endpoint);

        let weak = self.self_weak.clone();
        let executor = transport.executor().clone();
        let timeout = request.attempt_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(connection) = weak.upgrade() {
                executor.dispatch(async move { connection.fail_attempt() });
            }
        });
    }

    fn ping(&self, peer_id: NodeId, peer_endpoint: SocketAddr, handler: PingHandler) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        *self.state.lock().unwrap() = ConnectionState::Temporary;
        *self.ping_handler.lock().unwrap() = Some(handler);
        *self.reason.lock().unwrap() = ConnectionReason::Ping;
        self.socket
            .set_peer(peer_id, PublicKey::from_bytes([0; ID_SIZE]), peer_endpoint);

        let id = transport.connection_manager().add_socket(self.socket.clone());
        self.socket_id.store(id, Ordering::SeqCst);
        self.send_handshake(ConnectionReason::Ping, peer_endpoint);

        let weak = self.self_weak.clone();
        let executor = transport.executor().clone();
        let timeout = self.ping_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(connection) = weak.upgrade() else {
                return;
            };
            executor.dispatch(async move {
                if connection.socket.is_connected() || connection.closed.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(handler) = connection.ping_handler.lock().unwrap().take() {
                    handler(1);
                }
                connection.do_close(None);
            });
        });
    }

    fn start_sending(&self, message: Vec<u8>, handler: SentHandler) {
        self.sent_messages.lock().unwrap().push(message);
        handler(0);
    }

    fn make_permanent(&self, _validated: bool) {
        *self.state.lock().unwrap() = ConnectionState::Permanent;
    }

    fn close(&self) {
        let Some(connection) = self.self_weak.upgrade() else {
            return;
        };
        match self.transport.upgrade() {
            Some(transport) => {
                transport
                    .executor()
                    .dispatch(async move { connection.do_close(None) });
            }
            None => connection.do_close(None),
        }
    }

    fn expires_from_now(&self) -> Duration {
        match *self.deadline.lock().unwrap() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}

pub struct MockFactory {
    multiplexer: Arc<dyn Multiplexer>,
    transport: RwLock<Weak<Transport>>,
    created: Mutex<Vec<Arc<MockConnection>>>,
    ping_timeout: Mutex<Duration>,
    nat_detection_endpoint: Mutex<Option<SocketAddr>>,
}

impl MockFactory {
    pub fn new(multiplexer: Arc<dyn Multiplexer>) -> Arc<Self> {
        Arc::new(Self {
            multiplexer,
            transport: RwLock::new(Weak::new()),
            created: Mutex::new(Vec::new()),
            ping_timeout: Mutex::new(Duration::from_secs(10)),
            nat_detection_endpoint: Mutex::new(None),
        })
    }

    pub fn set_transport(&self, transport: &Arc<Transport>) {
        *self.transport.write().unwrap() = Arc::downgrade(transport);
    }

    /// Shrink the ping timeout, for tests that exercise ping failure.
    pub fn set_ping_timeout(&self, timeout: Duration) {
        *self.ping_timeout.lock().unwrap() = timeout;
    }

    /// Make every minted socket advertise a NAT-detection endpoint.
    pub fn set_nat_detection_endpoint(&self, endpoint: SocketAddr) {
        *self.nat_detection_endpoint.lock().unwrap() = Some(endpoint);
    }

    /// Every connection this factory has minted, in creation order.
    pub fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().unwrap().clone()
    }
}

impl ConnectionFactory for MockFactory {
    fn new_connection(&self) -> ConnectionPtr {
        let connection = MockConnection::new(
            self.transport.read().unwrap().clone(),
            Arc::clone(&self.multiplexer),
            *self.ping_timeout.lock().unwrap(),
            *self.nat_detection_endpoint.lock().unwrap(),
        );
        self.created.lock().unwrap().push(connection.clone());
        connection
    }
}

// ---------------------------------------------------------------------------
// Transport fixture
// ---------------------------------------------------------------------------

/// Records every upward callback a transport fires.
#[derive(Default)]
pub struct EventLog {
    pub added: Mutex<Vec<(NodeId, bool)>>,
    pub lost: Mutex<Vec<(NodeId, bool, bool)>>,
    pub messages: Mutex<Vec<(NodeId, Vec<u8>)>>,
    pub nat_requests: Mutex<Vec<(NodeId, SocketAddr)>>,
}

impl EventLog {
    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.lock().unwrap().len()
    }
}

/// One transport over loopback UDP with the mock engine plugged in.
pub struct TestNode {
    pub transport: Arc<Transport>,
    pub factory: Arc<MockFactory>,
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub events: Arc<EventLog>,
    pub nat: NatState,
}

impl TestNode {
    pub fn new(seed: u8) -> Self {
        init_tracing();
        let multiplexer: Arc<dyn Multiplexer> = Arc::new(UdpMultiplexer::new());
        let factory = MockFactory::new(Arc::clone(&multiplexer));
        let node_id = NodeId::from_bytes([seed; ID_SIZE]);
        let public_key = PublicKey::from_bytes([seed.wrapping_add(0x80); ID_SIZE]);
        let nat = NatState::new();
        let transport = Transport::new(
            multiplexer,
            factory.clone(),
            nat.clone(),
            node_id,
            public_key,
            test_parameters(),
        );
        factory.set_transport(&transport);
        Self {
            transport,
            factory,
            node_id,
            public_key,
            events: Arc::new(EventLog::default()),
            nat,
        }
    }

    /// Bootstrap on an ephemeral loopback port and await the outcome.
    pub async fn bootstrap(
        &self,
        candidates: Vec<Contact>,
        bootstrap_off_existing_connection: bool,
    ) -> Result<Option<Contact>, RudpError> {
        let (result_tx, result_rx) = oneshot::channel();
        let events = Arc::clone(&self.events);
        let callbacks = BootstrapCallbacks {
            on_message: {
                let events = Arc::clone(&events);
                Arc::new(move |peer, message| {
                    events.messages.lock().unwrap().push((peer, message));
                })
            },
            on_connection_added: {
                let events = Arc::clone(&events);
                Arc::new(move |peer, _transport, is_temporary, _connection| {
                    events.added.lock().unwrap().push((peer, is_temporary));
                })
            },
            on_connection_lost: {
                let events = Arc::clone(&events);
                Arc::new(move |peer, _transport, is_temporary, timed_out| {
                    events
                        .lost
                        .lock()
                        .unwrap()
                        .push((peer, is_temporary, timed_out));
                })
            },
            on_nat_detection_requested: {
                let events = Arc::clone(&events);
                Arc::new(move |peer, endpoint| {
                    events.nat_requests.lock().unwrap().push((peer, endpoint));
                })
            },
        };
        self.transport
            .bootstrap(
                candidates,
                "127.0.0.1:0".parse().unwrap(),
                bootstrap_off_existing_connection,
                callbacks,
                Box::new(move |result| {
                    let _ = result_tx.send(result);
                }),
            )
            .await;
        result_rx.await.expect("bootstrap outcome never reported")
    }

    /// This node as a bootstrap candidate. Valid once bootstrapped.
    pub fn contact(&self) -> Contact {
        let local = self
            .transport
            .local_endpoint()
            .expect("contact() before bootstrap");
        Contact {
            id: self.node_id,
            endpoints: EndpointPair::external_only(local),
            public_key: self.public_key,
        }
    }

    /// Register a socket so the demultiplexer engages for this node.
    ///
    /// A transport with an empty socket registry drops every inbound
    /// datagram, so pure listeners seed one via a ping to a black hole.
    pub async fn seed_listener_socket(&self) {
        self.transport
            .ping(NodeId::from_bytes([0xfd; ID_SIZE]), unreachable_endpoint(), Box::new(|_| {}));
        self.transport.executor().flush().await;
    }
}

/// A hand-driven connection for exercising transport lifecycle logic
/// without any networking.
pub struct ManualConnection {
    socket: Arc<MockSocket>,
    state: Mutex<ConnectionState>,
    pub close_calls: AtomicU32,
}

impl ManualConnection {
    pub fn new(peer_id: NodeId, peer_endpoint: &str, state: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            socket: Arc::new(MockSocket {
                connection: Weak::new(),
                peer_id: RwLock::new(peer_id),
                peer_public_key: RwLock::new(PublicKey::from_bytes([0; ID_SIZE])),
                peer_endpoint: RwLock::new(peer_endpoint.parse().unwrap()),
                this_endpoint: RwLock::new(None),
                nat_detection_endpoint: RwLock::new(None),
                connected: AtomicBool::new(true),
            }),
            state: Mutex::new(state),
            close_calls: AtomicU32::new(0),
        })
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

impl Connection for ManualConnection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn socket(&self) -> SocketHandle {
        self.socket.clone()
    }

    fn start_connecting(
        &self,
        _request: ConnectRequest,
        _handlers: ConnectionHandlers,
        _failure: Option<FailureHandler>,
    ) {
    }

    fn ping(&self, _peer_id: NodeId, _peer_endpoint: SocketAddr, _handler: PingHandler) {}

    fn start_sending(&self, _message: Vec<u8>, handler: SentHandler) {
        handler(0);
    }

    fn make_permanent(&self, _validated: bool) {
        *self.state.lock().unwrap() = ConnectionState::Permanent;
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn expires_from_now(&self) -> Duration {
        Duration::MAX
    }
}
