//! The connection seam and its lifecycle states.

use crate::error::RudpError;
use crate::node_id::{NodeId, PublicKey};
use crate::socket::SocketHandle;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but not yet offered to the registry.
    Pending,
    /// Provisional connection made through the bootstrap path.
    Bootstrapping,
    /// One-shot connection (ping, bootstrap-and-drop); never registered.
    Temporary,
    /// Handshaked, awaiting application validation.
    Unvalidated,
    /// Application-validated, long-lived.
    Permanent,
    /// Superseded by an equivalent existing connection; all upward
    /// callbacks for it are suppressed.
    Duplicate,
}

impl ConnectionState {
    /// Whether this state admits the connection to the registry.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Bootstrapping
                | ConnectionState::Unvalidated
                | ConnectionState::Permanent
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Pending => "pending",
            ConnectionState::Bootstrapping => "bootstrapping",
            ConnectionState::Temporary => "temporary",
            ConnectionState::Unvalidated => "unvalidated",
            ConnectionState::Permanent => "permanent",
            ConnectionState::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// Everything a connection attempt needs to get started.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Identity of the peer being connected to.
    pub peer_id: NodeId,
    /// Endpoint to attempt.
    pub peer_endpoint: SocketAddr,
    /// The peer's public key.
    pub peer_public_key: PublicKey,
    /// Opaque application bytes carried in the validation exchange.
    pub validation_data: Vec<u8>,
    /// How long the attempt itself may take.
    pub attempt_timeout: Duration,
    /// How long the connection lives once made. Zero means connect and
    /// drop immediately; [`Parameters::INFINITE_LIFESPAN`] means no expiry.
    ///
    /// [`Parameters::INFINITE_LIFESPAN`]: crate::parameters::Parameters::INFINITE_LIFESPAN
    pub lifespan: Duration,
}

/// Shared handle to a connection.
pub type ConnectionPtr = Arc<dyn Connection>;

/// Invoked exactly once when a connect attempt resolves.
pub type OnConnect = Box<dyn FnOnce(Result<(), RudpError>, ConnectionPtr) + Send>;

/// Invoked exactly once when a previously connected connection closes.
/// The error is `Some(RudpError::TimedOut)` when the close was an expiry.
pub type OnClose = Box<dyn FnOnce(Option<RudpError>, ConnectionPtr) + Send>;

/// Invoked when a connect attempt fails outright, in addition to
/// [`OnConnect`] reporting the error.
pub type FailureHandler = Box<dyn FnOnce() + Send>;

/// Receives a ping result code; `0` is success.
pub type PingHandler = Box<dyn FnOnce(i32) + Send>;

/// Receives a send result code; `0` is success.
pub type SentHandler = Box<dyn FnOnce(i32) + Send>;

/// Completion handlers wired into a connection at start.
///
/// Engine contract: `on_connect` fires exactly once per attempt, from the
/// transport's executor. `on_close` fires exactly once, also on the
/// executor, and only for connections whose `on_connect` reported success.
pub struct ConnectionHandlers {
    /// Attempt resolution.
    pub on_connect: OnConnect,
    /// Eventual close of a successfully connected connection.
    pub on_close: OnClose,
}

/// A logical reliable connection, implemented by the reliability engine
/// outside this crate.
///
/// The core creates connections through a [`ConnectionFactory`], drives
/// them through the methods below, and tracks them in the connection
/// registry while their state is normal.
pub trait Connection: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// The socket carrying this connection.
    fn socket(&self) -> SocketHandle;

    /// Begin connecting to a peer. The connection starts in
    /// [`ConnectionState::Pending`] and reports through `handlers`.
    fn start_connecting(
        &self,
        request: ConnectRequest,
        handlers: ConnectionHandlers,
        failure: Option<FailureHandler>,
    );

    /// Probe a peer with a one-shot ping. The connection stays
    /// [`ConnectionState::Temporary`] and reports only through `handler`.
    fn ping(&self, peer_id: NodeId, peer_endpoint: SocketAddr, handler: PingHandler);

    /// Queue a message on the connection.
    fn start_sending(&self, message: Vec<u8>, handler: SentHandler);

    /// Promote an unvalidated connection to permanent.
    fn make_permanent(&self, validated: bool);

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Time remaining until the connection expires.
    fn expires_from_now(&self) -> Duration;
}

/// Creates connections bound to one transport's executor and multiplexer.
pub trait ConnectionFactory: Send + Sync {
    /// A fresh connection in [`ConnectionState::Pending`].
    fn new_connection(&self) -> ConnectionPtr;
}

/// Identity comparison for shared connection handles.
#[must_use]
pub fn same_connection(a: &ConnectionPtr, b: &ConnectionPtr) -> bool {
    Arc::ptr_eq(a, b)
}
