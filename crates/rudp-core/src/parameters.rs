//! Transport tunables.

use std::time::Duration;

/// Timing parameters for connection establishment and bootstrap.
///
/// One instance is carried per transport; tests shrink the timeouts to keep
/// failure paths fast.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// How long a single bootstrap connect attempt may take.
    pub bootstrap_connect_timeout: Duration,

    /// Lifespan granted to connections made through the bootstrap path.
    pub bootstrap_connection_lifespan: Duration,

    /// How long a rendezvous (normal outbound) connect attempt may take.
    pub rendezvous_connect_timeout: Duration,
}

impl Parameters {
    /// Hard cap on simultaneously registered connections per transport.
    pub const MAX_CONNECTIONS: usize = 50;

    /// Largest message accepted for sending (64 MiB).
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

    /// Lifespan sentinel for established connections that never expire.
    pub const INFINITE_LIFESPAN: Duration = Duration::MAX;
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            bootstrap_connect_timeout: Duration::from_secs(3),
            bootstrap_connection_lifespan: Duration::from_secs(30),
            rendezvous_connect_timeout: Duration::from_secs(5),
        }
    }
}
