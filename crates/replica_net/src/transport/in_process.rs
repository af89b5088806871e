//! # In-Process Transport
//!
//! Server and clients living in the same process, linked through an
//! [`InProcessRegistry`] that maps ports to listening servers.
//!
//! ## Design
//!
//! - The registry is an explicit object shared by both ends, never a global
//! - A server offers a fixed pool of slots; the slot index is the client id
//! - Each slot owns one unbounded channel pair, so either end may move to
//!   another thread
//! - A connect against a full server fails immediately
//! - A connected client becomes `Connected` on its next `update`; the server
//!   learns about it on its own next `update`
//! - Either end closes a link by raising its shared flag; undelivered
//!   messages are dropped with the link

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    ClientCallbacks, ClientState, ServerCallbacks, ServerState, TransportClient, TransportError,
    TransportResult, TransportServer, TransportStats,
};
use crate::types::ClientId;

/// Port table shared by in-process servers and clients.
#[derive(Clone, Default)]
pub struct InProcessRegistry {
    servers: Arc<Mutex<HashMap<u16, Arc<Listener>>>>,
}

impl InProcessRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a server listens on `port`.
    #[must_use]
    pub fn is_listening(&self, port: u16) -> bool {
        self.servers.lock().contains_key(&port)
    }

    fn register(&self, port: u16, listener: Arc<Listener>) -> TransportResult<()> {
        let mut servers = self.servers.lock();
        if servers.contains_key(&port) {
            return Err(TransportError::PortInUse(port));
        }
        servers.insert(port, listener);
        Ok(())
    }

    fn unregister(&self, port: u16) {
        self.servers.lock().remove(&port);
    }

    fn find(&self, port: u16) -> Option<Arc<Listener>> {
        self.servers.lock().get(&port).cloned()
    }
}

/// One direction-pair of a connection, as seen from one end.
struct LinkEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl LinkEnd {
    fn pair() -> (Self, Self) {
        let (to_server, from_client) = unbounded();
        let (to_client, from_server) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let server = Self {
            tx: to_client,
            rx: from_client,
            closed: Arc::clone(&closed),
        };
        let client = Self {
            tx: to_server,
            rx: from_server,
            closed,
        };
        (server, client)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Listening side shared between a server and connecting clients.
struct Listener {
    slots: Mutex<Vec<Option<LinkEnd>>>,
    joins: Sender<ClientId>,
}

impl Listener {
    fn claim_slot(&self) -> Option<(ClientId, LinkEnd)> {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(Option::is_none)?;
        let id = ClientId(u32::try_from(index).ok()?);
        let (server_end, client_end) = LinkEnd::pair();
        slots[index] = Some(server_end);
        // The receiver lives in the server; it outlives the registry entry.
        let _ = self.joins.send(id);
        Some((id, client_end))
    }
}

/// In-process server transport.
pub struct InProcessServer {
    registry: InProcessRegistry,
    listener: Option<Arc<Listener>>,
    joins: Option<Receiver<ClientId>>,
    port: u16,
    connected: Vec<ClientId>,
    callbacks: ServerCallbacks,
    stats: TransportStats,
}

impl InProcessServer {
    /// Creates a server that will register itself in `registry`.
    #[must_use]
    pub fn new(registry: InProcessRegistry) -> Self {
        Self {
            registry,
            listener: None,
            joins: None,
            port: 0,
            connected: Vec::new(),
            callbacks: ServerCallbacks::default(),
            stats: TransportStats::default(),
        }
    }

    fn drop_client(&mut self, client: ClientId) {
        let Some(listener) = &self.listener else {
            return;
        };
        if let Some(end) = listener
            .slots
            .lock()
            .get_mut(client.0 as usize)
            .and_then(Option::take)
        {
            end.close();
        }
        if let Some(pos) = self.connected.iter().position(|c| *c == client) {
            self.connected.remove(pos);
            info!(%client, port = self.port, "in-process client disconnected");
            self.callbacks.fire_client_disconnected(client);
        }
    }
}

impl TransportServer for InProcessServer {
    fn listen(&mut self, host: &str, port: u16, max_connections: usize) -> TransportResult<()> {
        if self.listener.is_some() {
            return Err(TransportError::AlreadyListening);
        }
        let (joins_tx, joins_rx) = unbounded();
        let listener = Arc::new(Listener {
            slots: Mutex::new((0..max_connections).map(|_| None).collect()),
            joins: joins_tx,
        });
        self.registry.register(port, Arc::clone(&listener))?;
        self.listener = Some(listener);
        self.joins = Some(joins_rx);
        self.port = port;
        info!(host, port, max_connections, "in-process server listening");
        Ok(())
    }

    fn stop(&mut self) {
        if self.listener.is_none() {
            return;
        }
        self.registry.unregister(self.port);
        for client in self.connected.clone() {
            self.drop_client(client);
        }
        if let Some(listener) = self.listener.take() {
            // Slots claimed but not yet announced.
            for end in listener.slots.lock().iter_mut().filter_map(Option::take) {
                end.close();
            }
        }
        self.joins = None;
        info!(port = self.port, "in-process server stopped");
    }

    fn update(&mut self, _dt: Duration) {
        let joined: Vec<ClientId> = self
            .joins
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for client in joined {
            self.connected.push(client);
            self.connected.sort_unstable();
            info!(%client, port = self.port, "in-process client connected");
            self.callbacks.fire_client_connected(client);
        }

        let closed: Vec<ClientId> = match &self.listener {
            Some(listener) => {
                let slots = listener.slots.lock();
                self.connected
                    .iter()
                    .copied()
                    .filter(|c| {
                        slots
                            .get(c.0 as usize)
                            .and_then(Option::as_ref)
                            .map_or(true, LinkEnd::is_closed)
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        for client in closed {
            self.drop_client(client);
        }
    }

    fn send(&mut self, client: ClientId, bytes: &[u8]) -> TransportResult<()> {
        let listener = self.listener.as_ref().ok_or(TransportError::NotListening)?;
        let slots = listener.slots.lock();
        let end = slots
            .get(client.0 as usize)
            .and_then(Option::as_ref)
            .filter(|end| !end.is_closed())
            .ok_or(TransportError::UnknownClient(client))?;
        if end.tx.send(bytes.to_vec()).is_err() {
            self.stats.send_errors += 1;
            return Err(TransportError::UnknownClient(client));
        }
        self.stats.record_send(bytes.len());
        Ok(())
    }

    fn receive(&mut self, client: ClientId) -> Option<Vec<u8>> {
        let listener = self.listener.as_ref()?;
        let message = listener
            .slots
            .lock()
            .get(client.0 as usize)
            .and_then(Option::as_ref)
            .and_then(|end| end.rx.try_recv().ok())?;
        self.stats.record_receive(message.len());
        Some(message)
    }

    fn disconnect(&mut self, client: ClientId) {
        debug!(%client, "kicking in-process client");
        self.drop_client(client);
    }

    fn connection_state(&self) -> ServerState {
        if self.listener.is_some() {
            ServerState::Listening
        } else {
            ServerState::NotListening
        }
    }

    fn clients(&self) -> Vec<ClientId> {
        self.connected.clone()
    }

    fn set_callbacks(&mut self, callbacks: ServerCallbacks) {
        self.callbacks = callbacks;
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for InProcessServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// In-process client transport.
pub struct InProcessClient {
    registry: InProcessRegistry,
    state: ClientState,
    link: Option<LinkEnd>,
    client_id: Option<ClientId>,
    callbacks: ClientCallbacks,
    stats: TransportStats,
}

impl InProcessClient {
    /// Creates a client that looks servers up in `registry`.
    #[must_use]
    pub fn new(registry: InProcessRegistry) -> Self {
        Self {
            registry,
            state: ClientState::Disconnected,
            link: None,
            client_id: None,
            callbacks: ClientCallbacks::default(),
            stats: TransportStats::default(),
        }
    }

    /// Slot assigned by the server while connecting or connected.
    #[must_use]
    pub const fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    fn fail(&mut self, error: TransportError) -> TransportResult<()> {
        warn!(%error, "in-process connect failed");
        self.callbacks.fire_connection_failed();
        Err(error)
    }
}

impl TransportClient for InProcessClient {
    fn connect(&mut self, host: &str, port: u16) -> TransportResult<()> {
        if self.state != ClientState::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        let Some(listener) = self.registry.find(port) else {
            return self.fail(TransportError::NoServer {
                host: host.to_owned(),
                port,
            });
        };
        let Some((id, link)) = listener.claim_slot() else {
            return self.fail(TransportError::ServerFull);
        };
        debug!(client = %id, port, "in-process slot claimed");
        self.link = Some(link);
        self.client_id = Some(id);
        self.state = ClientState::Connecting;
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        link.close();
        self.client_id = None;
        let was = std::mem::replace(&mut self.state, ClientState::Disconnected);
        match was {
            ClientState::Connected => self.callbacks.fire_disconnected(),
            ClientState::Connecting => self.callbacks.fire_connection_failed(),
            ClientState::Disconnected => {}
        }
    }

    fn update(&mut self, _dt: Duration) {
        let closed = self.link.as_ref().is_some_and(LinkEnd::is_closed);
        if closed {
            info!("in-process link closed by server");
            self.disconnect();
            return;
        }
        if self.state == ClientState::Connecting {
            self.state = ClientState::Connected;
            info!(client = ?self.client_id, "in-process client connected");
            self.callbacks.fire_connected();
        }
    }

    fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if self.state != ClientState::Connected {
            return Err(TransportError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if link.is_closed() || link.tx.send(bytes.to_vec()).is_err() {
            self.stats.send_errors += 1;
            return Err(TransportError::NotConnected);
        }
        self.stats.record_send(bytes.len());
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        let link = self.link.as_ref()?;
        if link.is_closed() {
            return None;
        }
        let message = link.rx.try_recv().ok()?;
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
        self.stats
    }
}

impl Drop for InProcessClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(16);

    fn counter() -> (Arc<Mutex<Vec<&'static str>>>, ClientCallbacks) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let callbacks = ClientCallbacks {
            connected: Some(Box::new(move || a.lock().push("connected"))),
            connection_failed: Some(Box::new(move || b.lock().push("failed"))),
            disconnected: Some(Box::new(move || c.lock().push("disconnected"))),
        };
        (log, callbacks)
    }

    #[test]
    fn test_connect_and_exchange() {
        let registry = InProcessRegistry::new();
        let mut server = InProcessServer::new(registry.clone());
        server.listen("localhost", 9000, 4).unwrap();

        let mut client = InProcessClient::new(registry);
        let (log, callbacks) = counter();
        client.set_callbacks(callbacks);
        client.connect("localhost", 9000).unwrap();
        assert_eq!(client.connection_state(), ClientState::Connecting);

        client.update(TICK);
        server.update(TICK);
        assert_eq!(client.connection_state(), ClientState::Connected);
        assert_eq!(*log.lock(), vec!["connected"]);
        assert_eq!(server.clients(), vec![ClientId(0)]);

        client.send(b"one").unwrap();
        client.send(b"two").unwrap();
        assert_eq!(server.receive(ClientId(0)).as_deref(), Some(&b"one"[..]));
        assert_eq!(server.receive(ClientId(0)).as_deref(), Some(&b"two"[..]));
        assert_eq!(server.receive(ClientId(0)), None);

        server.send(ClientId(0), b"back").unwrap();
        assert_eq!(client.receive().as_deref(), Some(&b"back"[..]));
        assert_eq!(client.stats().messages_sent, 2);
        assert_eq!(server.stats().bytes_received, 6);
    }

    #[test]
    fn test_full_server_fails_immediately() {
        let registry = InProcessRegistry::new();
        let mut server = InProcessServer::new(registry.clone());
        server.listen("localhost", 9000, 1).unwrap();

        let mut first = InProcessClient::new(registry.clone());
        first.connect("localhost", 9000).unwrap();

        let mut second = InProcessClient::new(registry);
        let (log, callbacks) = counter();
        second.set_callbacks(callbacks);
        assert!(matches!(
            second.connect("localhost", 9000),
            Err(TransportError::ServerFull)
        ));
        assert_eq!(second.connection_state(), ClientState::Disconnected);
        assert_eq!(*log.lock(), vec!["failed"]);
    }

    #[test]
    fn test_no_server() {
        let mut client = InProcessClient::new(InProcessRegistry::new());
        assert!(matches!(
            client.connect("localhost", 1),
            Err(TransportError::NoServer { port: 1, .. })
        ));
        assert_eq!(client.connection_state(), ClientState::Disconnected);
    }

    #[test]
    fn test_port_in_use() {
        let registry = InProcessRegistry::new();
        let mut a = InProcessServer::new(registry.clone());
        let mut b = InProcessServer::new(registry.clone());
        a.listen("localhost", 7, 1).unwrap();
        assert!(matches!(b.listen("localhost", 7, 1), Err(TransportError::PortInUse(7))));
        drop(a);
        assert!(!registry.is_listening(7));
        b.listen("localhost", 7, 1).unwrap();
    }

    #[test]
    fn test_client_disconnect_frees_slot() {
        let registry = InProcessRegistry::new();
        let mut server = InProcessServer::new(registry.clone());
        let left = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&left);
        server.set_callbacks(ServerCallbacks {
            client_connected: None,
            client_disconnected: Some(Box::new(move |c| sink.lock().push(c))),
        });
        server.listen("localhost", 9000, 1).unwrap();

        let mut client = InProcessClient::new(registry.clone());
        client.connect("localhost", 9000).unwrap();
        client.update(TICK);
        server.update(TICK);

        client.disconnect();
        server.update(TICK);
        assert_eq!(*left.lock(), vec![ClientId(0)]);
        assert!(server.clients().is_empty());

        let mut again = InProcessClient::new(registry);
        again.connect("localhost", 9000).unwrap();
    }

    #[test]
    fn test_kick_disconnects_client() {
        let registry = InProcessRegistry::new();
        let mut server = InProcessServer::new(registry.clone());
        server.listen("localhost", 9000, 2).unwrap();

        let mut client = InProcessClient::new(registry);
        let (log, callbacks) = counter();
        client.set_callbacks(callbacks);
        client.connect("localhost", 9000).unwrap();
        client.update(TICK);
        server.update(TICK);

        server.send(ClientId(0), b"lost").unwrap();
        server.disconnect(ClientId(0));
        client.update(TICK);

        assert_eq!(client.connection_state(), ClientState::Disconnected);
        assert_eq!(client.receive(), None);
        assert_eq!(*log.lock(), vec!["connected", "disconnected"]);
    }
}
