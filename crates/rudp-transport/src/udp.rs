//! UDP multiplexer implementation over Tokio.

use crate::multiplexer::{Multiplexer, MultiplexerError, MultiplexerResult, MultiplexerStats};
use crate::MAX_DATAGRAM_SIZE;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

/// Socket buffer size requested from the kernel for both directions.
const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Production multiplexer over a Tokio UDP socket.
///
/// Created unopened; [`open`](Multiplexer::open) binds the socket. The
/// socket is configured through `socket2` with enlarged send/receive
/// buffers before being handed to Tokio.
#[derive(Default)]
pub struct UdpMultiplexer {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    closed: AtomicBool,
    shutdown: Notify,
    best_guess_external: RwLock<Option<SocketAddr>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl UdpMultiplexer {
    /// Create a new unopened multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current_socket(&self) -> MultiplexerResult<Arc<UdpSocket>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(MultiplexerError::Closed);
        }
        self.socket
            .lock()
            .expect("socket lock poisoned")
            .as_ref()
            .cloned()
            .ok_or(MultiplexerError::NotOpen)
    }

    fn bind_socket(addr: SocketAddr) -> MultiplexerResult<UdpSocket> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket = socket2::Socket::new(
            domain,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(|e| MultiplexerError::BindFailed(e.to_string()))?;

        socket
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| MultiplexerError::BindFailed(e.to_string()))?;
        socket
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| MultiplexerError::BindFailed(e.to_string()))?;

        socket
            .bind(&addr.into())
            .map_err(|e| MultiplexerError::BindFailed(e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| MultiplexerError::BindFailed(e.to_string()))?;
        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| MultiplexerError::BindFailed(e.to_string()))
    }
}

#[async_trait]
impl Multiplexer for UdpMultiplexer {
    async fn open(&self, local_endpoint: SocketAddr) -> MultiplexerResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(MultiplexerError::Closed);
        }
        let socket = Self::bind_socket(local_endpoint)?;
        tracing::debug!(
            "multiplexer open on {}",
            socket.local_addr().map_err(MultiplexerError::Io)?
        );
        *self.socket.lock().expect("socket lock poisoned") = Some(Arc::new(socket));
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
            && self.socket.lock().expect("socket lock poisoned").is_some()
    }

    async fn next_datagram(&self) -> MultiplexerResult<(Vec<u8>, SocketAddr)> {
        let socket = self.current_socket()?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let received = tokio::select! {
            _ = self.shutdown.notified() => return Err(MultiplexerError::Closed),
            received = socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((size, from)) => {
                self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                self.datagrams_received.fetch_add(1, Ordering::Relaxed);
                buf.truncate(size);
                Ok((buf, from))
            }
            Err(e) => {
                self.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(MultiplexerError::Io(e))
            }
        }
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> MultiplexerResult<usize> {
        let socket = self.current_socket()?;
        match socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(MultiplexerError::Io(e))
            }
        }
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        self.socket
            .lock()
            .expect("socket lock poisoned")
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    fn external_endpoint(&self) -> Option<SocketAddr> {
        *self
            .best_guess_external
            .read()
            .expect("external endpoint lock poisoned")
    }

    fn set_best_guess_external_endpoint(&self, endpoint: SocketAddr) {
        *self
            .best_guess_external
            .write()
            .expect("external endpoint lock poisoned") = Some(endpoint);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        // Wake any receiver blocked in next_datagram, then release the port.
        self.shutdown.notify_waiters();
        self.socket.lock().expect("socket lock poisoned").take();
    }

    fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
