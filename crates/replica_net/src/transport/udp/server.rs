//! UDP server transport.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::reliability::ReliableChannel;
use super::{decode_packet, encode_packet, resolve, PacketHeader, PacketKind, UdpEndpoint};
use crate::config::UdpConfig;
use crate::transport::{
    ServerCallbacks, ServerState, TransportError, TransportResult, TransportServer,
    TransportStats,
};
use crate::types::ClientId;

struct Peer {
    addr: SocketAddr,
    channel: ReliableChannel,
    last_heard: Duration,
    last_sent: Duration,
}

/// Server end of the reliable UDP transport.
pub struct UdpServer {
    config: UdpConfig,
    socket: Option<UdpEndpoint>,
    max_connections: usize,
    peers: BTreeMap<ClientId, Peer>,
    by_addr: HashMap<SocketAddr, ClientId>,
    clock: Duration,
    callbacks: ServerCallbacks,
    stats: TransportStats,
    resends_of_dropped: u64,
}

impl UdpServer {
    /// Creates a server with the given tunables.
    #[must_use]
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            socket: None,
            max_connections: 0,
            peers: BTreeMap::new(),
            by_addr: HashMap::new(),
            clock: Duration::ZERO,
            callbacks: ServerCallbacks::default(),
            stats: TransportStats::default(),
            resends_of_dropped: 0,
        }
    }

    /// Bound address while listening. Useful after listening on port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(UdpEndpoint::local_addr)
    }

    fn send_packet(&mut self, client: ClientId, kind: PacketKind, sequence: u16, body: &[u8]) {
        let (Some(socket), Some(peer)) = (self.socket.as_mut(), self.peers.get_mut(&client))
        else {
            return;
        };
        let header = peer.channel.header(sequence);
        socket.send_to(&encode_packet(header, kind, body), peer.addr);
        peer.last_sent = self.clock;
    }

    fn flush(&mut self, client: ClientId) {
        let Some(peer) = self.peers.get_mut(&client) else {
            return;
        };
        let due = peer.channel.poll_transmit(self.clock);
        for (sequence, body) in due {
            self.send_packet(client, PacketKind::Payload, sequence, &body);
        }
    }

    fn free_client_id(&self) -> Option<ClientId> {
        (0..self.max_connections)
            .filter_map(|i| u32::try_from(i).ok().map(ClientId))
            .find(|id| !self.peers.contains_key(id))
    }

    fn accept(&mut self, addr: SocketAddr) {
        if let Some(&existing) = self.by_addr.get(&addr) {
            // Our ConnectAck was lost; repeat it.
            self.send_packet(existing, PacketKind::ConnectAck, 0, &existing.0.to_le_bytes());
            return;
        }
        let Some(client) = self.free_client_id() else {
            warn!(%addr, "udp connect denied, server full");
            if let Some(socket) = self.socket.as_mut() {
                let denied = encode_packet(PacketHeader::default(), PacketKind::ConnectDenied, &[]);
                socket.send_to(&denied, addr);
            }
            return;
        };

        self.peers.insert(
            client,
            Peer {
                addr,
                channel: ReliableChannel::new(&self.config),
                last_heard: self.clock,
                last_sent: self.clock,
            },
        );
        self.by_addr.insert(addr, client);
        self.send_packet(client, PacketKind::ConnectAck, 0, &client.0.to_le_bytes());
        info!(%client, %addr, "udp client connected");
        self.callbacks.fire_client_connected(client);
    }

    fn remove_peer(&mut self, client: ClientId, notify_peer: bool) {
        if notify_peer {
            self.send_packet(client, PacketKind::Disconnect, 0, &[]);
        }
        let Some(peer) = self.peers.remove(&client) else {
            return;
        };
        self.by_addr.remove(&peer.addr);
        self.resends_of_dropped += peer.channel.resends();
        info!(%client, addr = %peer.addr, "udp client disconnected");
        self.callbacks.fire_client_disconnected(client);
    }

    fn handle_packet(&mut self, bytes: &[u8], addr: SocketAddr) {
        let Some((header, kind, body)) = decode_packet(bytes) else {
            self.stats.recv_errors += 1;
            trace!(%addr, len = bytes.len(), "undecodable udp packet");
            return;
        };
        if kind == PacketKind::Connect {
            self.accept(addr);
            return;
        }
        let Some(&client) = self.by_addr.get(&addr) else {
            trace!(%addr, ?kind, "packet from unknown address ignored");
            return;
        };
        let Some(peer) = self.peers.get_mut(&client) else {
            return;
        };
        peer.last_heard = self.clock;
        peer.channel.process_ack(&header);
        match kind {
            PacketKind::Payload => peer.channel.receive_payload(header.sequence, body),
            PacketKind::Disconnect => self.remove_peer(client, false),
            PacketKind::Heartbeat => {}
            PacketKind::Connect | PacketKind::ConnectAck | PacketKind::ConnectDenied => {
                debug!(%client, ?kind, "unexpected packet from client");
            }
        }
    }
}

impl TransportServer for UdpServer {
    fn listen(&mut self, host: &str, port: u16, max_connections: usize) -> TransportResult<()> {
        if self.socket.is_some() {
            return Err(TransportError::AlreadyListening);
        }
        let addr = resolve(host, port)?;
        let socket = UdpEndpoint::bind(addr)?;
        info!(addr = %socket.local_addr(), max_connections, "udp server listening");
        self.socket = Some(socket);
        self.max_connections = max_connections;
        self.clock = Duration::ZERO;
        Ok(())
    }

    fn stop(&mut self) {
        if self.socket.is_none() {
            return;
        }
        let clients: Vec<ClientId> = self.peers.keys().copied().collect();
        for client in clients {
            self.remove_peer(client, true);
        }
        self.socket = None;
        info!("udp server stopped");
    }

    fn update(&mut self, dt: Duration) {
        if self.socket.is_none() {
            return;
        }
        self.clock += dt;

        while let Some((bytes, addr)) = self.socket.as_mut().and_then(UdpEndpoint::recv) {
            self.handle_packet(&bytes, addr);
        }

        let timeout = self.config.connection_timeout();
        let silent: Vec<ClientId> = self
            .peers
            .iter()
            .filter(|(_, p)| self.clock.saturating_sub(p.last_heard) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for client in silent {
            warn!(%client, "udp client timed out");
            self.remove_peer(client, false);
        }

        let heartbeat = self.config.heartbeat_interval();
        let clients: Vec<ClientId> = self.peers.keys().copied().collect();
        for client in clients {
            self.flush(client);
            let idle = self.peers.get(&client).is_some_and(|p| {
                p.channel.ack_pending() || self.clock.saturating_sub(p.last_sent) >= heartbeat
            });
            if idle {
                self.send_packet(client, PacketKind::Heartbeat, 0, &[]);
            }
        }
    }

    fn send(&mut self, client: ClientId, bytes: &[u8]) -> TransportResult<()> {
        if self.socket.is_none() {
            return Err(TransportError::NotListening);
        }
        let peer = self
            .peers
            .get_mut(&client)
            .ok_or(TransportError::UnknownClient(client))?;
        if let Err(e) = peer.channel.send(bytes) {
            self.stats.send_errors += 1;
            return Err(e);
        }
        self.stats.record_send(bytes.len());
        self.flush(client);
        Ok(())
    }

    fn receive(&mut self, client: ClientId) -> Option<Vec<u8>> {
        let message = self.peers.get_mut(&client)?.channel.pop_message()?;
        self.stats.record_receive(message.len());
        Some(message)
    }

    fn disconnect(&mut self, client: ClientId) {
        self.remove_peer(client, true);
    }

    fn connection_state(&self) -> ServerState {
        if self.socket.is_some() {
            ServerState::Listening
        } else {
            ServerState::NotListening
        }
    }

    fn clients(&self) -> Vec<ClientId> {
        self.peers.keys().copied().collect()
    }

    fn set_callbacks(&mut self, callbacks: ServerCallbacks) {
        self.callbacks = callbacks;
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats;
        stats.resends =
            self.resends_of_dropped + self.peers.values().map(|p| p.channel.resends()).sum::<u64>();
        if let Some(socket) = &self.socket {
            stats.send_errors += socket.stats().send_errors;
            stats.recv_errors += socket.stats().recv_errors;
        }
        stats
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}
