//! # Transport Layer
//!
//! Message channels between one server and its clients.
//!
//! ## Design
//!
//! - Messages are whole byte buffers, delivered in order per peer
//! - Every call is non-blocking; `update` pumps the backend once per frame
//! - `receive` yields at most one message per call and must be drained
//! - Connection transitions fire the registered callbacks from `update`,
//!   `connect` or `disconnect`, on the calling thread
//!
//! Two backends: [`in_process`] moves messages through channels between
//! co-located objects, [`udp`] runs a reliable ordered protocol over UDP.

pub mod in_process;
pub mod udp;

use std::time::Duration;

use thiserror::Error;

use crate::types::ClientId;

/// Errors raised by transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// `listen` called on a listening server.
    #[error("server is already listening")]
    AlreadyListening,

    /// The server is not listening.
    #[error("server is not listening")]
    NotListening,

    /// Another server holds the port.
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// `connect` called while connecting or connected.
    #[error("client is already connecting or connected")]
    AlreadyConnected,

    /// The client is not connected.
    #[error("client is not connected")]
    NotConnected,

    /// Nothing listens at the address.
    #[error("no server at {host}:{port}")]
    NoServer {
        /// Requested host.
        host: String,
        /// Requested port.
        port: u16,
    },

    /// Every connection slot is taken.
    #[error("server is full")]
    ServerFull,

    /// The client id does not name a connected client.
    #[error("unknown {0}")]
    UnknownClient(ClientId),

    /// The message exceeds what the transport can carry.
    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge {
        /// Message size.
        size: usize,
        /// Transport limit.
        max: usize,
    },

    /// The address could not be resolved.
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// Socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Server connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerState {
    /// Not accepting connections.
    #[default]
    NotListening,
    /// Accepting connections.
    Listening,
}

/// Client connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// No connection.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected to a server.
    Connected,
}

/// Transport traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Packets sent again after a timeout.
    pub resends: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors, including undecodable packets.
    pub recv_errors: u64,
}

impl TransportStats {
    pub(crate) fn record_send(&mut self, len: usize) {
        self.messages_sent += 1;
        self.bytes_sent += len as u64;
    }

    pub(crate) fn record_receive(&mut self, len: usize) {
        self.messages_received += 1;
        self.bytes_received += len as u64;
    }
}

/// Callback without arguments.
pub type Callback = Box<dyn FnMut() + Send>;

/// Callback receiving a client id.
pub type ClientCallback = Box<dyn FnMut(ClientId) + Send>;

/// Client transition callbacks.
#[derive(Default)]
pub struct ClientCallbacks {
    /// `Connecting -> Connected`.
    pub connected: Option<Callback>,
    /// `Connecting -> Disconnected`, or a `connect` that failed outright.
    pub connection_failed: Option<Callback>,
    /// `Connected -> Disconnected`.
    pub disconnected: Option<Callback>,
}

impl ClientCallbacks {
    pub(crate) fn fire_connected(&mut self) {
        if let Some(cb) = self.connected.as_mut() {
            cb();
        }
    }

    pub(crate) fn fire_connection_failed(&mut self) {
        if let Some(cb) = self.connection_failed.as_mut() {
            cb();
        }
    }

    pub(crate) fn fire_disconnected(&mut self) {
        if let Some(cb) = self.disconnected.as_mut() {
            cb();
        }
    }
}

/// Server transition callbacks.
#[derive(Default)]
pub struct ServerCallbacks {
    /// A client finished connecting.
    pub client_connected: Option<ClientCallback>,
    /// A client left, timed out or was kicked.
    pub client_disconnected: Option<ClientCallback>,
}

impl ServerCallbacks {
    pub(crate) fn fire_client_connected(&mut self, client: ClientId) {
        if let Some(cb) = self.client_connected.as_mut() {
            cb(client);
        }
    }

    pub(crate) fn fire_client_disconnected(&mut self, client: ClientId) {
        if let Some(cb) = self.client_disconnected.as_mut() {
            cb(client);
        }
    }
}

/// Server end of a transport.
pub trait TransportServer: Send {
    /// Starts accepting up to `max_connections` clients.
    ///
    /// # Errors
    ///
    /// Fails if already listening or the address is unavailable.
    fn listen(&mut self, host: &str, port: u16, max_connections: usize) -> TransportResult<()>;

    /// Disconnects every client and stops listening.
    fn stop(&mut self);

    /// Pumps the backend. Call once per frame.
    fn update(&mut self, dt: Duration);

    /// Queues a message for one client.
    ///
    /// # Errors
    ///
    /// Fails if the client is unknown or the message too large.
    fn send(&mut self, client: ClientId, bytes: &[u8]) -> TransportResult<()>;

    /// Next message from one client, if any.
    fn receive(&mut self, client: ClientId) -> Option<Vec<u8>>;

    /// Drops one client.
    fn disconnect(&mut self, client: ClientId);

    /// Listening state.
    fn connection_state(&self) -> ServerState;

    /// Connected clients, ascending.
    fn clients(&self) -> Vec<ClientId>;

    /// Replaces the transition callbacks.
    fn set_callbacks(&mut self, callbacks: ServerCallbacks);

    /// Traffic counters.
    fn stats(&self) -> TransportStats;
}

/// Client end of a transport.
pub trait TransportClient: Send {
    /// Starts connecting to a server.
    ///
    /// # Errors
    ///
    /// Fails if already connecting or connected, or if the attempt fails
    /// immediately. An immediate failure also fires `connection_failed`.
    fn connect(&mut self, host: &str, port: u16) -> TransportResult<()>;

    /// Drops the connection, discarding undelivered messages.
    fn disconnect(&mut self);

    /// Pumps the backend. Call once per frame.
    fn update(&mut self, dt: Duration);

    /// Queues a message for the server.
    ///
    /// # Errors
    ///
    /// Fails if not connected or the message is too large.
    fn send(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Next message from the server, if any.
    fn receive(&mut self) -> Option<Vec<u8>>;

    /// Connection state.
    fn connection_state(&self) -> ClientState;

    /// Replaces the transition callbacks.
    fn set_callbacks(&mut self, callbacks: ClientCallbacks);

    /// Traffic counters.
    fn stats(&self) -> TransportStats;
}
