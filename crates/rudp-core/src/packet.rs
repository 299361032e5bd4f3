//! Packet inspection.
//!
//! The core reads exactly two things off the wire: the destination socket
//! id every datagram carries, and the handshake body of datagrams that are
//! not yet routed to a socket. Everything else inside a datagram belongs to
//! the per-connection reliability engine.
//!
//! Wire layout (the only part the core knows):
//!
//! ```text
//!  0                   1
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//! +-------------------------------+
//! |C| type  |     engine data     |   bytes 0..12  (C = control flag)
//! |                               |
//! +-------------------------------+
//! |    destination socket id      |   bytes 12..16 (big endian, 0 = unrouted)
//! +-------------------------------+
//! ```
//!
//! A handshake is a control packet of type `0` addressed to socket id `0`;
//! its body is `reason (1) || node_id (32) || public_key (32)`.

use crate::node_id::{NodeId, PublicKey, ID_SIZE};

/// Size of the fixed packet header.
pub const HEADER_SIZE: usize = 16;

/// Byte offset of the destination socket id within the header.
pub const DESTINATION_SOCKET_ID_OFFSET: usize = 12;

/// Control flag bit in the first header byte.
const CONTROL_FLAG: u8 = 0x80;

/// Control packet type carrying a handshake.
const HANDSHAKE_TYPE: u8 = 0x00;

/// Total size of an encoded handshake packet.
pub const HANDSHAKE_PACKET_SIZE: usize = HEADER_SIZE + 1 + ID_SIZE + ID_SIZE;

/// Why a peer is initiating a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReason {
    /// An ordinary rendezvous connect between known peers.
    Normal,
    /// A one-shot liveness or NAT-detection probe.
    Ping,
    /// Join the network through this peer, then drop the connection.
    BootstrapAndDrop,
    /// Join the network through this peer and keep a short-lived
    /// connection.
    BootstrapAndKeep,
}

impl ConnectionReason {
    /// Wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionReason::Normal => 0,
            ConnectionReason::Ping => 1,
            ConnectionReason::BootstrapAndDrop => 2,
            ConnectionReason::BootstrapAndKeep => 3,
        }
    }

    /// Decode a wire value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionReason::Normal),
            1 => Some(ConnectionReason::Ping),
            2 => Some(ConnectionReason::BootstrapAndDrop),
            3 => Some(ConnectionReason::BootstrapAndKeep),
            _ => None,
        }
    }
}

/// Decoded handshake body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePacket {
    /// The sender's identity.
    pub node_id: NodeId,
    /// The sender's public key.
    pub public_key: PublicKey,
    /// Why the sender is connecting.
    pub reason: ConnectionReason,
}

impl HandshakePacket {
    /// Encode into a datagram addressed to socket id `0`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HANDSHAKE_PACKET_SIZE];
        buf[0] = CONTROL_FLAG | HANDSHAKE_TYPE;
        // Destination socket id stays zero: handshake, unrouted.
        buf[HEADER_SIZE] = self.reason.to_u8();
        buf[HEADER_SIZE + 1..HEADER_SIZE + 1 + ID_SIZE].copy_from_slice(self.node_id.as_bytes());
        buf[HEADER_SIZE + 1 + ID_SIZE..].copy_from_slice(self.public_key.as_bytes());
        buf
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != HANDSHAKE_PACKET_SIZE {
            return None;
        }
        if data[0] != (CONTROL_FLAG | HANDSHAKE_TYPE) {
            return None;
        }
        let reason = ConnectionReason::from_u8(data[HEADER_SIZE])?;
        let mut node_id = [0u8; ID_SIZE];
        node_id.copy_from_slice(&data[HEADER_SIZE + 1..HEADER_SIZE + 1 + ID_SIZE]);
        let mut public_key = [0u8; ID_SIZE];
        public_key.copy_from_slice(&data[HEADER_SIZE + 1 + ID_SIZE..]);
        Some(Self {
            node_id: NodeId::from_bytes(node_id),
            public_key: PublicKey::from_bytes(public_key),
            reason,
        })
    }
}

/// What a received datagram turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspected {
    /// Not an RUDP packet; the caller logs and drops it.
    NotRudp,
    /// Routed to a specific socket; the id is never zero.
    ForSocket(u32),
    /// An unrouted handshake.
    Handshake(HandshakePacket),
}

/// Classify a raw datagram.
///
/// Pure: touches no state and does no logging. Datagrams addressed to
/// socket id `0` must decode as handshakes; anything else at id `0` is
/// treated as non-RUDP noise.
#[must_use]
pub fn inspect(data: &[u8]) -> Inspected {
    let Some(id_bytes) = data.get(DESTINATION_SOCKET_ID_OFFSET..DESTINATION_SOCKET_ID_OFFSET + 4)
    else {
        return Inspected::NotRudp;
    };
    let socket_id = u32::from_be_bytes(id_bytes.try_into().expect("4-byte slice"));
    if socket_id != 0 {
        return Inspected::ForSocket(socket_id);
    }
    match HandshakePacket::decode(data) {
        Some(packet) => Inspected::Handshake(packet),
        None => Inspected::NotRudp,
    }
}

/// Build the header of an engine datagram addressed to `socket_id`.
///
/// The engine appends its own payload after the header; the core only ever
/// reads the destination id back out.
#[must_use]
pub fn encode_data_header(socket_id: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[DESTINATION_SOCKET_ID_OFFSET..DESTINATION_SOCKET_ID_OFFSET + 4]
        .copy_from_slice(&socket_id.to_be_bytes());
    header
}
