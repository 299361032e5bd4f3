//! # RUDP transport layer
//!
//! The multiplexer owns the single UDP socket a transport speaks through and
//! hands raw datagrams up to the connection-management core. This crate
//! provides:
//! - The [`Multiplexer`] trait the core is written against
//! - [`UdpMultiplexer`], the production implementation over a Tokio UDP
//!   socket tuned through `socket2`
//! - Transfer statistics for diagnostics
//!
//! Everything above the datagram boundary (handshake routing, connection
//! lifecycle, reliability) lives in `rudp-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod multiplexer;
pub mod udp;

pub use multiplexer::{Multiplexer, MultiplexerError, MultiplexerResult, MultiplexerStats};
pub use udp::UdpMultiplexer;

/// Largest UDP datagram the multiplexer will receive.
pub const MAX_DATAGRAM_SIZE: usize = 65536;
