//! # Reliable UDP Transport
//!
//! Connection-oriented, reliable and ordered message transport over UDP.
//!
//! ## Design
//!
//! - Non-blocking `std` sockets, polled from `update`
//! - A small handshake: `Connect` is retried until `ConnectAck` or
//!   `ConnectDenied` arrives
//! - Payloads ride a [`ReliableChannel`] per peer; heartbeats carry acks
//!   when there is nothing else to send and keep idle links alive
//! - Peers silent for the connection timeout are dropped
//!
//! Packet layout: `[PacketHeader][kind: u8][body]`.

mod client;
mod reliability;
mod server;

pub use client::UdpClient;
pub use reliability::{
    PacketHeader, ReliableChannel, MAX_FRAGMENT_SIZE, MAX_MESSAGE_SIZE, MAX_PACKET_SIZE,
};
pub use server::UdpServer;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::stream::{Reader, Writer};
use crate::transport::{TransportError, TransportResult};

/// Types of packets in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Client -> Server: connection request.
    Connect = 0,
    /// Server -> Client: connection accepted, body is the client id.
    ConnectAck = 1,
    /// Server -> Client: connection refused, server full.
    ConnectDenied = 2,
    /// Bidirectional: orderly disconnect.
    Disconnect = 3,
    /// Bidirectional: reliable message fragment.
    Payload = 4,
    /// Bidirectional: keep-alive carrying acks.
    Heartbeat = 5,
}

impl PacketKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connect),
            1 => Some(Self::ConnectAck),
            2 => Some(Self::ConnectDenied),
            3 => Some(Self::Disconnect),
            4 => Some(Self::Payload),
            5 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Encodes a packet.
fn encode_packet(header: PacketHeader, kind: PacketKind, body: &[u8]) -> Vec<u8> {
    let mut out = Writer::with_capacity(PacketHeader::SIZE + 1 + body.len());
    out.write_pod(&header);
    out.write_u8(kind as u8);
    out.write_bytes(body);
    out.into_inner()
}

/// Decodes a packet; `None` if it is not one of ours.
fn decode_packet(bytes: &[u8]) -> Option<(PacketHeader, PacketKind, &[u8])> {
    let mut input = Reader::new(bytes);
    let header = input.read_pod::<PacketHeader>().ok()?;
    let kind = PacketKind::from_u8(input.read_u8().ok()?)?;
    Some((header, kind, input.rest()))
}

fn resolve(host: &str, port: u16) -> TransportResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::InvalidAddress(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(format!("{host}:{port}")))
}

const RECV_ERROR_RETRIES: usize = 8;

/// Socket statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

/// UDP socket wrapper.
///
/// Non-blocking, with a fixed receive buffer and packet statistics.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    stats: SocketStats,
}

impl UdpEndpoint {
    /// Binds a non-blocking socket to `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            stats: SocketStats::default(),
        })
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends one packet, counting failures instead of reporting them.
    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) {
        match self.socket.send_to(data, addr) {
            Ok(_) => self.stats.packets_sent += 1,
            Err(e) => {
                self.stats.send_errors += 1;
                tracing::trace!(%addr, error = %e, "udp send failed");
            }
        }
    }

    /// Receives one packet, if any is waiting.
    pub fn recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        for _ in 0..RECV_ERROR_RETRIES {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    return Some((self.recv_buffer[..len].to_vec(), addr));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                // ICMP port unreachable from an earlier send surfaces here on some
                // platforms; it says nothing about the next packet.
                Err(_) => self.stats.recv_errors += 1,
            }
        }
        None
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &SocketStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_codec() {
        let header = PacketHeader::new(7, 3, 0b101);
        let bytes = encode_packet(header, PacketKind::Payload, b"abc");
        assert_eq!(bytes.len(), PacketHeader::SIZE + 1 + 3);

        let (decoded, kind, body) = decode_packet(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(kind, PacketKind::Payload);
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_foreign_packets_rejected() {
        assert!(decode_packet(&[1, 2, 3]).is_none());
        let mut bytes = encode_packet(PacketHeader::default(), PacketKind::Heartbeat, &[]);
        bytes[PacketHeader::SIZE] = 99;
        assert!(decode_packet(&bytes).is_none());
    }

    #[test]
    fn test_endpoint_loopback() {
        let mut a = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.send_to(b"ping", b.local_addr());

        let mut got = None;
        for _ in 0..200 {
            if let Some(packet) = b.recv() {
                got = Some(packet);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let (data, from) = got.unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(from, a.local_addr());
        assert_eq!(a.stats().packets_sent, 1);
    }
}
