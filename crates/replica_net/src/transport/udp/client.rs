//! UDP client transport.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::reliability::ReliableChannel;
use super::{decode_packet, encode_packet, resolve, PacketKind, UdpEndpoint};
use crate::config::UdpConfig;
use crate::transport::{
    ClientCallbacks, ClientState, TransportClient, TransportError, TransportResult,
    TransportStats,
};
use crate::types::ClientId;

/// Client end of the reliable UDP transport.
pub struct UdpClient {
    config: UdpConfig,
    socket: Option<UdpEndpoint>,
    server: Option<SocketAddr>,
    state: ClientState,
    channel: ReliableChannel,
    client_id: Option<ClientId>,
    clock: Duration,
    connect_started: Duration,
    last_attempt: Duration,
    last_heard: Duration,
    last_sent: Duration,
    callbacks: ClientCallbacks,
    stats: TransportStats,
}

impl UdpClient {
    /// Creates a disconnected client with the given tunables.
    #[must_use]
    pub fn new(config: UdpConfig) -> Self {
        let channel = ReliableChannel::new(&config);
        Self {
            config,
            socket: None,
            server: None,
            state: ClientState::Disconnected,
            channel,
            client_id: None,
            clock: Duration::ZERO,
            connect_started: Duration::ZERO,
            last_attempt: Duration::ZERO,
            last_heard: Duration::ZERO,
            last_sent: Duration::ZERO,
            callbacks: ClientCallbacks::default(),
            stats: TransportStats::default(),
        }
    }

    /// Id the server assigned, once connected.
    #[must_use]
    pub const fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    fn send_packet(&mut self, kind: PacketKind, sequence: u16, body: &[u8]) {
        let (Some(socket), Some(server)) = (self.socket.as_mut(), self.server) else {
            return;
        };
        let header = self.channel.header(sequence);
        socket.send_to(&encode_packet(header, kind, body), server);
        self.last_sent = self.clock;
    }

    fn flush(&mut self) {
        for (sequence, body) in self.channel.poll_transmit(self.clock) {
            self.send_packet(PacketKind::Payload, sequence, &body);
        }
    }

    fn reset(&mut self) {
        self.socket = None;
        self.server = None;
        self.client_id = None;
        self.state = ClientState::Disconnected;
        self.stats.resends += self.channel.resends();
        self.channel = ReliableChannel::new(&self.config);
    }

    fn fail_connect(&mut self, reason: &str) {
        warn!(server = ?self.server, reason, "udp connect failed");
        self.reset();
        self.callbacks.fire_connection_failed();
    }

    fn drop_connection(&mut self, reason: &str) {
        info!(server = ?self.server, reason, "udp client disconnected");
        self.reset();
        self.callbacks.fire_disconnected();
    }

    fn handle_packet(&mut self, bytes: &[u8]) {
        let Some((header, kind, body)) = decode_packet(bytes) else {
            self.stats.recv_errors += 1;
            return;
        };
        match (self.state, kind) {
            (ClientState::Connecting, PacketKind::ConnectAck) => {
                let Ok(raw) = <[u8; 4]>::try_from(body) else {
                    self.stats.recv_errors += 1;
                    return;
                };
                let id = ClientId(u32::from_le_bytes(raw));
                self.client_id = Some(id);
                self.state = ClientState::Connected;
                self.last_heard = self.clock;
                info!(client = %id, server = ?self.server, "udp client connected");
                self.callbacks.fire_connected();
            }
            (ClientState::Connecting, PacketKind::ConnectDenied) => {
                self.fail_connect("server full");
            }
            (ClientState::Connected, _) => {
                self.last_heard = self.clock;
                self.channel.process_ack(&header);
                match kind {
                    PacketKind::Payload => self.channel.receive_payload(header.sequence, body),
                    PacketKind::Disconnect => self.drop_connection("server closed the connection"),
                    PacketKind::Heartbeat | PacketKind::ConnectAck => {}
                    PacketKind::Connect | PacketKind::ConnectDenied => {
                        debug!(?kind, "unexpected packet from server");
                    }
                }
            }
            (state, kind) => trace!(?state, ?kind, "packet ignored"),
        }
    }
}

impl TransportClient for UdpClient {
    fn connect(&mut self, host: &str, port: u16) -> TransportResult<()> {
        if self.state != ClientState::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        let server = match resolve(host, port) {
            Ok(addr) => addr,
            Err(e) => {
                self.fail_connect("address did not resolve");
                return Err(e);
            }
        };
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = match UdpEndpoint::bind(local) {
            Ok(socket) => socket,
            Err(e) => {
                self.fail_connect("could not bind a local socket");
                return Err(e.into());
            }
        };

        self.socket = Some(socket);
        self.server = Some(server);
        self.state = ClientState::Connecting;
        self.connect_started = self.clock;
        self.last_attempt = self.clock;
        self.send_packet(PacketKind::Connect, 0, &[]);
        debug!(%server, "udp connecting");
        Ok(())
    }

    fn disconnect(&mut self) {
        match self.state {
            ClientState::Disconnected => {}
            ClientState::Connecting => self.fail_connect("cancelled"),
            ClientState::Connected => {
                self.send_packet(PacketKind::Disconnect, 0, &[]);
                self.drop_connection("disconnect requested");
            }
        }
    }

    fn update(&mut self, dt: Duration) {
        self.clock += dt;
        if self.state == ClientState::Disconnected {
            return;
        }

        while let Some((bytes, from)) = self.socket.as_mut().and_then(UdpEndpoint::recv) {
            if Some(from) == self.server {
                self.handle_packet(&bytes);
            }
        }

        match self.state {
            ClientState::Disconnected => {}
            ClientState::Connecting => {
                if self.clock.saturating_sub(self.connect_started) > self.config.connect_timeout() {
                    self.fail_connect("timed out");
                } else if self.clock.saturating_sub(self.last_attempt) >= self.config.connect_retry()
                {
                    self.last_attempt = self.clock;
                    self.send_packet(PacketKind::Connect, 0, &[]);
                }
            }
            ClientState::Connected => {
                if self.clock.saturating_sub(self.last_heard) > self.config.connection_timeout() {
                    self.drop_connection("timed out");
                    return;
                }
                self.flush();
                if self.channel.ack_pending()
                    || self.clock.saturating_sub(self.last_sent)
                        >= self.config.heartbeat_interval()
                {
                    self.send_packet(PacketKind::Heartbeat, 0, &[]);
                }
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if self.state != ClientState::Connected {
            return Err(TransportError::NotConnected);
        }
        if let Err(e) = self.channel.send(bytes) {
            self.stats.send_errors += 1;
            return Err(e);
        }
        self.stats.record_send(bytes.len());
        self.flush();
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        let message = self.channel.pop_message()?;
        self.stats.record_receive(message.len());
        Some(message)
    }

    fn connection_state(&self) -> ClientState {
        self.state
    }

    fn set_callbacks(&mut self, callbacks: ClientCallbacks) {
        self.callbacks = callbacks;
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats;
        stats.resends += self.channel.resends();
        if let Some(socket) = &self.socket {
            stats.send_errors += socket.stats().send_errors;
            stats.recv_errors += socket.stats().recv_errors;
        }
        stats
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        if self.state == ClientState::Connected {
            self.send_packet(PacketKind::Disconnect, 0, &[]);
        }
    }
}
