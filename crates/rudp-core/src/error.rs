//! Error types for the connection-management core.

use thiserror::Error;

/// Errors surfaced by the transport and connection manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RudpError {
    /// The multiplexer could not bind its local endpoint.
    #[error("failed to open multiplexer: {0}")]
    FailedToOpen(String),

    /// Bootstrap exhausted its candidate list without connecting.
    #[error("no bootstrap candidate was connectable")]
    NotConnectable,

    /// An outbound connect was attempted on a closed multiplexer, or the
    /// peer refused the attempt.
    #[error("failed to connect to peer")]
    FailedToConnect,

    /// A non-normal connection was offered for admission.
    #[error("connection is not in an admissible state")]
    InvalidConnection,

    /// A connection for the same peer is already registered. Logged,
    /// never propagated to the application.
    #[error("a connection to this peer already exists")]
    ConnectionAlreadyExists,

    /// The connection attempt or connection itself timed out.
    #[error("connection timed out")]
    TimedOut,
}

impl RudpError {
    /// Whether this error reports a timeout, for the `timed_out` flag of
    /// the connection-lost callback.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RudpError::TimedOut)
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, RudpError>;

/// Outcome of offering a connection to the registry.
///
/// The boolean admission result of the public API is
/// `outcome == Admitted`; the three-way split exists so the transport can
/// distinguish a duplicate (ignore) from an invalid state (close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The connection was inserted into the registry.
    Admitted,
    /// The connection is not in a normal state and was rejected.
    InvalidConnection,
    /// A connection for this peer is already registered.
    AlreadyExists,
}
