//! Multiplexer trait abstraction.
//!
//! The connection-management core talks to the network exclusively through
//! this trait, which keeps the core testable against loopback or in-memory
//! implementations.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Multiplexer layer errors
#[derive(Debug, thiserror::Error)]
pub enum MultiplexerError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The multiplexer has been closed
    #[error("multiplexer is closed")]
    Closed,

    /// The multiplexer was never opened
    #[error("multiplexer is not open")]
    NotOpen,

    /// Address binding failed
    #[error("failed to bind to address: {0}")]
    BindFailed(String),
}

/// Result type for multiplexer operations
pub type MultiplexerResult<T> = Result<T, MultiplexerError>;

/// Asynchronous demultiplexing UDP endpoint.
///
/// One multiplexer owns one kernel UDP socket. A transport opens it on a
/// local endpoint, then pulls inbound datagrams off it one at a time with
/// [`next_datagram`](Multiplexer::next_datagram) while per-connection engines
/// push outbound packets through [`send_to`](Multiplexer::send_to).
///
/// Closing the multiplexer is the sole termination condition for the
/// transport's dispatch loop: once closed, `next_datagram` and `send_to`
/// fail with [`MultiplexerError::Closed`].
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Bind the underlying socket to `local_endpoint`.
    ///
    /// # Errors
    /// Returns [`MultiplexerError::BindFailed`] if the address cannot be
    /// bound, or [`MultiplexerError::Closed`] if the multiplexer was
    /// already closed.
    async fn open(&self, local_endpoint: SocketAddr) -> MultiplexerResult<()>;

    /// Whether the multiplexer is open (bound and not closed).
    fn is_open(&self) -> bool;

    /// Receive the next raw datagram along with its source endpoint.
    async fn next_datagram(&self) -> MultiplexerResult<(Vec<u8>, SocketAddr)>;

    /// Send a raw datagram to `addr`, returning the number of bytes sent.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> MultiplexerResult<usize>;

    /// The local endpoint the socket is bound to, if open.
    fn local_endpoint(&self) -> Option<SocketAddr>;

    /// This node's external endpoint as currently believed.
    ///
    /// Starts out as whatever was supplied via
    /// [`set_best_guess_external_endpoint`](Multiplexer::set_best_guess_external_endpoint).
    fn external_endpoint(&self) -> Option<SocketAddr>;

    /// Record the best current guess of this node's external endpoint.
    fn set_best_guess_external_endpoint(&self, endpoint: SocketAddr);

    /// Close the multiplexer. Idempotent.
    async fn close(&self);

    /// Transfer statistics.
    fn stats(&self) -> MultiplexerStats {
        MultiplexerStats::default()
    }
}

/// Multiplexer transfer statistics
#[derive(Debug, Clone, Default)]
pub struct MultiplexerStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total datagrams sent
    pub datagrams_sent: u64,
    /// Total datagrams received
    pub datagrams_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}
