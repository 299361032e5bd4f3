//! # RUDP connection-management core
//!
//! Multiplexes many logical, reliable, authenticated peer-to-peer
//! connections over a single UDP socket, drives their lifecycle from
//! bootstrap through teardown, and routes every inbound datagram to
//! exactly one recipient.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Transport                           │
//! │  (bootstrap, dispatch loop, lifecycle callbacks, close)    │
//! ├────────────────────────────────────────────────────────────┤
//! │                    ConnectionManager                       │
//! │  (connection registry, socket registry, demultiplexing)   │
//! ├────────────────────────────────────────────────────────────┤
//! │   Multiplexer (rudp-transport)  │  Reliability engine      │
//! │   (one UDP socket per node)     │  (external, via traits)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The reliability engine itself — sliding windows, retransmission,
//! congestion — plugs in behind the [`Socket`] and [`Connection`] traits;
//! this crate owns routing, registration, and lifecycle only.
//!
//! ## Concurrency
//!
//! Each transport serializes all connection-touching work through one
//! [`Executor`]. Public entry points may be called from any thread; they
//! take the registry mutex only to locate a connection handle, then
//! schedule the actual work on the executor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod connection_manager;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod nat;
pub mod node_id;
pub mod packet;
pub mod parameters;
pub mod socket;
pub mod socket_registry;
pub mod transport;

pub use connection::{
    ConnectRequest, Connection, ConnectionFactory, ConnectionHandlers, ConnectionPtr,
    ConnectionState, FailureHandler, OnClose, OnConnect, PingHandler, SentHandler,
};
pub use connection_manager::ConnectionManager;
pub use endpoint::{Contact, EndpointPair};
pub use error::{AdmitOutcome, Result, RudpError};
pub use executor::Executor;
pub use nat::{NatState, NatType};
pub use node_id::{NodeId, PublicKey};
pub use packet::{ConnectionReason, HandshakePacket, Inspected};
pub use parameters::Parameters;
pub use socket::{Socket, SocketHandle};
pub use socket_registry::SocketRegistry;
pub use transport::{
    BootstrapCallbacks, ConnectHandler, OnBootstrap, OnConnectionAdded, OnConnectionLost,
    OnMessage, OnNatDetectionRequested, Transport,
};
