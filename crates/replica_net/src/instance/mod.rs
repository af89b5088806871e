//! # Net Instance
//!
//! [`NetInstance`] is the root of the replication layer. It owns exactly one
//! transport, plays either the server or the client side of the protocol,
//! and is stepped once per frame by [`NetInstance::update`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────── NetInstance ──────────────────────────┐
//! │                                                                 │
//! │  transport callbacks ──► TransportEvent channel ──┐             │
//! │                                                   ▼             │
//! │  Transport::receive ──► NetMessage::decode ──► Server/ClientSide│
//! │                                                   │             │
//! │  CNetData::send_rpc ──► RPC outbox ───────────────┤             │
//! │                                                   ▼             │
//! │                        SceneManager ◄── NetEntityPipeline       │
//! │                                                                 │
//! │  NetEvent ──► EventSystem (game / UI)                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - Single threaded and frame stepped: everything runs inside `update` on
//!   the caller's thread, so protocol state needs no locks
//! - Inbound protocol failures are logged and dropped, never returned
//! - The scene is borrowed per call, never owned

mod client;
mod id_map;
mod pipeline;
mod server;
mod spawn;

pub use id_map::EntityIdMap;
pub use pipeline::{BuildFn, EntityTypeRegistry, NetEntityPipeline};
pub use spawn::{ResponseOutcome, SpawnCallback, SpawnState, SpawnTracker};

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use replica_core::{Component, Entity, EntityId, EventSystem, SceneManager};
use tracing::info;

use crate::config::NetConfig;
use crate::error::{NetError, NetResult};
use crate::layout::RpcKey;
use crate::net_data::{CNetData, NetHandle, NetMode, OutgoingRpc};
use crate::stream::Streamable;
use crate::transport::{
    ClientCallbacks, ClientState, ServerCallbacks, ServerState, TransportClient,
    TransportServer, TransportStats,
};
use crate::types::{ClientId, EntityType, RemoteId, SpawnRequestId};

use client::ClientSide;
use server::ServerSide;

/// Pipeline shared between the game and one or more net instances.
pub type SharedPipeline = Arc<Mutex<dyn NetEntityPipeline>>;

/// Events a net instance announces to the rest of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetEvent {
    /// Client: the connection to the server is up.
    JoinServer,
    /// Client: the connection attempt failed.
    ConnectionFailed,
    /// Client: the connection to the server is gone.
    LeftServer,
    /// Server: a client connected.
    ServerClientConnected {
        /// The new client.
        client_id: ClientId,
    },
    /// Server: a client left, timed out or was kicked.
    ServerClientDisconnected {
        /// The departed client.
        client_id: ClientId,
    },
    /// Client: a spawn request will never complete.
    SpawnFailed {
        /// The failed request.
        request_id: SpawnRequestId,
    },
}

/// Transport transitions, queued by callbacks and handled during `update`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransportEvent {
    Connected,
    ConnectionFailed,
    Disconnected,
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
}

/// State both sides use.
struct Shared {
    config: NetConfig,
    pipeline: SharedPipeline,
    events: Arc<dyn EventSystem<NetEvent>>,
    handle: NetHandle,
    outbox: Receiver<OutgoingRpc>,
    transport_events: Receiver<TransportEvent>,
}

impl Shared {
    fn new(
        mode: NetMode,
        config: NetConfig,
        pipeline: SharedPipeline,
        events: Arc<dyn EventSystem<NetEvent>>,
    ) -> (Self, Sender<TransportEvent>) {
        let (handle, outbox) = NetHandle::channel(mode);
        let (events_tx, transport_events) = crossbeam_channel::unbounded();
        let shared = Self {
            config,
            pipeline,
            events,
            handle,
            outbox,
            transport_events,
        };
        (shared, events_tx)
    }

    fn emit(&self, event: NetEvent) {
        self.events.trigger_event(event);
    }
}

enum Side {
    Server(ServerSide),
    Client(ClientSide),
}

/// Server or client end of the replication protocol.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use parking_lot::Mutex;
/// use replica_core::{EventChannel, SceneManager};
/// use replica_net::instance::{EntityTypeRegistry, NetInstance};
/// use replica_net::transport::in_process::{InProcessRegistry, InProcessServer};
/// use replica_net::NetConfig;
///
/// let ports = InProcessRegistry::new();
/// let pipeline = Arc::new(Mutex::new(EntityTypeRegistry::new()));
/// let events = Arc::new(EventChannel::<replica_net::instance::NetEvent>::unbounded());
///
/// let mut server = NetInstance::server(
///     InProcessServer::new(ports.clone()),
///     pipeline,
///     events,
///     NetConfig::default(),
/// );
/// server.listen("localhost", 9000).unwrap();
///
/// let mut scene = SceneManager::new();
/// server.update(&mut scene, Duration::from_millis(16));
/// assert!(ports.is_listening(9000));
/// ```
pub struct NetInstance {
    shared: Shared,
    side: Side,
}

impl NetInstance {
    /// Creates a server instance over `transport`.
    pub fn server<T: TransportServer + 'static>(
        mut transport: T,
        pipeline: SharedPipeline,
        events: Arc<dyn EventSystem<NetEvent>>,
        config: NetConfig,
    ) -> Self {
        let (shared, tx) = Shared::new(NetMode::Server, config, pipeline, events);
        let on_leave = tx.clone();
        transport.set_callbacks(ServerCallbacks {
            client_connected: Some(Box::new(move |client| {
                let _ = tx.send(TransportEvent::ClientConnected(client));
            })),
            client_disconnected: Some(Box::new(move |client| {
                let _ = on_leave.send(TransportEvent::ClientDisconnected(client));
            })),
        });
        Self {
            shared,
            side: Side::Server(ServerSide::new(Box::new(transport))),
        }
    }

    /// Creates a client instance over `transport`.
    pub fn client<T: TransportClient + 'static>(
        mut transport: T,
        pipeline: SharedPipeline,
        events: Arc<dyn EventSystem<NetEvent>>,
        config: NetConfig,
    ) -> Self {
        let (shared, tx) = Shared::new(NetMode::Client, config, pipeline, events);
        let on_failed = tx.clone();
        let on_disconnected = tx.clone();
        transport.set_callbacks(ClientCallbacks {
            connected: Some(Box::new(move || {
                let _ = tx.send(TransportEvent::Connected);
            })),
            connection_failed: Some(Box::new(move || {
                let _ = on_failed.send(TransportEvent::ConnectionFailed);
            })),
            disconnected: Some(Box::new(move || {
                let _ = on_disconnected.send(TransportEvent::Disconnected);
            })),
        });
        Self {
            shared,
            side: Side::Client(ClientSide::new(Box::new(transport))),
        }
    }

    /// Server or client.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> NetMode {
        self.shared.handle.mode()
    }

    /// Returns true for a server instance.
    #[inline]
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.shared.handle.is_server()
    }

    /// Handle to attach to entities replicated by this instance.
    #[must_use]
    pub fn handle(&self) -> &NetHandle {
        &self.shared.handle
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.shared.config
    }

    /// Transport counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        match &self.side {
            Side::Server(server) => server.stats(),
            Side::Client(client) => client.stats(),
        }
    }

    fn server_mut(&mut self) -> NetResult<&mut ServerSide> {
        match &mut self.side {
            Side::Server(server) => Ok(server),
            Side::Client(_) => Err(NetError::NotServer),
        }
    }

    fn client_mut(&mut self) -> NetResult<&mut ClientSide> {
        match &mut self.side {
            Side::Client(client) => Ok(client),
            Side::Server(_) => Err(NetError::NotClient),
        }
    }

    /// Runs one frame of the protocol.
    ///
    /// Pumps the transport, handles connection changes and every queued
    /// inbound message, sends queued RPCs and, on a server, broadcasts the
    /// property state of every replicated entity.
    pub fn update(&mut self, scene: &mut SceneManager, dt: Duration) {
        match &mut self.side {
            Side::Server(server) => server.update(&self.shared, scene, dt),
            Side::Client(client) => client.update(&self.shared, scene, dt),
        }
    }

    /// Invokes an RPC on a local entity. See [`CNetData::send_rpc`].
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist or the RPC cannot be invoked.
    pub fn send_rpc<C: Component, A: Streamable>(
        &self,
        scene: &mut SceneManager,
        entity: EntityId,
        key: RpcKey<C, A>,
        args: &A,
    ) -> NetResult<()> {
        let entity = scene
            .find_entity_mut(entity)
            .ok_or(NetError::EntityNotFound(entity))?;
        CNetData::send_rpc(entity, key, args)
    }

    // ---------------------------------------------------------------------
    // Server
    // ---------------------------------------------------------------------

    /// Starts accepting up to `max_connections` clients on `host:port`.
    ///
    /// # Errors
    ///
    /// Fails on a client instance or when the transport cannot listen.
    pub fn listen(&mut self, host: &str, port: u16) -> NetResult<()> {
        let max = self.shared.config.max_connections;
        let server = self.server_mut()?;
        server.listen(host, port, max)?;
        info!(host, port, max_connections = max, "net instance listening");
        Ok(())
    }

    /// Starts replicating a networked entity to every connected client.
    ///
    /// `owner` becomes the entity's authoritative proxy; every other client
    /// mirrors it as a proxy. Replicating an already replicated entity does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails on a client instance, if the entity does not exist, has no
    /// bound [`CNetData`], or `owner` is not connected.
    pub fn replicate_entity(
        &mut self,
        scene: &mut SceneManager,
        entity: EntityId,
        entity_type: EntityType,
        owner: Option<ClientId>,
    ) -> NetResult<()> {
        let Side::Server(server) = &mut self.side else {
            return Err(NetError::NotServer);
        };
        server.replicate(&self.shared, scene, entity, entity_type, owner)
    }

    /// Stops replicating an entity and tells clients to drop their mirror.
    /// The entity stays in the server's scene.
    ///
    /// # Errors
    ///
    /// Fails on a client instance or if the entity is not replicated.
    pub fn stop_replicating(&mut self, entity: EntityId) -> NetResult<()> {
        self.server_mut()?.stop_replicating(entity)
    }

    /// Stops replicating an entity and removes it from the scene.
    ///
    /// # Errors
    ///
    /// Fails on a client instance or if the entity is not replicated; the
    /// scene is untouched in that case.
    pub fn destroy_entity(&mut self, scene: &mut SceneManager, entity: EntityId) -> NetResult<()> {
        self.server_mut()?.stop_replicating(entity)?;
        scene.despawn(entity);
        Ok(())
    }

    /// Hands the authoritative proxy of a replicated entity to `owner`, or
    /// to nobody.
    ///
    /// # Errors
    ///
    /// Fails on a client instance, if the entity is not replicated, or
    /// `owner` is not connected.
    pub fn set_owner(
        &mut self,
        scene: &mut SceneManager,
        entity: EntityId,
        owner: Option<ClientId>,
    ) -> NetResult<()> {
        self.server_mut()?.set_owner(scene, entity, owner)
    }

    /// Authoritative-proxy owner of a replicated entity.
    #[must_use]
    pub fn owner(&self, entity: EntityId) -> Option<ClientId> {
        match &self.side {
            Side::Server(server) => server.owner(entity),
            Side::Client(_) => None,
        }
    }

    /// Returns true if the server replicates `entity`.
    #[must_use]
    pub fn is_replicated(&self, entity: EntityId) -> bool {
        match &self.side {
            Side::Server(server) => server.is_replicated(entity),
            Side::Client(_) => false,
        }
    }

    /// Replicated entities in id order. Empty on a client.
    #[must_use]
    pub fn replicated_entities(&self) -> Vec<EntityId> {
        match &self.side {
            Side::Server(server) => server.replicated_entities(),
            Side::Client(_) => Vec::new(),
        }
    }

    /// Connected clients in id order. Empty on a client.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        match &self.side {
            Side::Server(server) => server.clients(),
            Side::Client(_) => Vec::new(),
        }
    }

    /// Disconnects a client. Announced on the next update.
    ///
    /// # Errors
    ///
    /// Fails on a client instance.
    pub fn kick(&mut self, client: ClientId) -> NetResult<()> {
        self.server_mut()?.kick(client);
        Ok(())
    }

    /// Listening state. `None` on a client.
    #[must_use]
    pub fn server_state(&self) -> Option<ServerState> {
        match &self.side {
            Side::Server(server) => Some(server.connection_state()),
            Side::Client(_) => None,
        }
    }

    // ---------------------------------------------------------------------
    // Client
    // ---------------------------------------------------------------------

    /// Starts connecting to a server. Completion is reported through
    /// [`NetEvent::JoinServer`] or [`NetEvent::ConnectionFailed`].
    ///
    /// # Errors
    ///
    /// Fails on a server instance or when the transport refuses outright.
    pub fn connect(&mut self, host: &str, port: u16) -> NetResult<()> {
        self.client_mut()?.connect(host, port)?;
        info!(host, port, "net instance connecting");
        Ok(())
    }

    /// Asks the server to spawn an entity of `entity_type`.
    ///
    /// `callback` runs once with the local mirror after both the entity and
    /// the server's answer have arrived. It never runs if the spawn fails;
    /// [`NetEvent::SpawnFailed`] is triggered instead.
    ///
    /// # Errors
    ///
    /// Fails on a server instance or when not connected.
    pub fn spawn_entity(
        &mut self,
        entity_type: EntityType,
        authoritative_proxy: bool,
        callback: impl FnOnce(&mut Entity) + Send + 'static,
    ) -> NetResult<SpawnRequestId> {
        self.client_mut()?
            .spawn_entity(entity_type, authoritative_proxy, Box::new(callback))
    }

    /// Number of spawn requests still waiting. Zero on a server.
    #[must_use]
    pub fn pending_spawns(&self) -> usize {
        match &self.side {
            Side::Client(client) => client.pending_spawns(),
            Side::Server(_) => 0,
        }
    }

    /// Local mirror of a server entity.
    #[must_use]
    pub fn local_entity(&self, remote: RemoteId) -> Option<EntityId> {
        match &self.side {
            Side::Client(client) => client.ids().local(remote),
            Side::Server(_) => None,
        }
    }

    /// Server id of a local mirror.
    #[must_use]
    pub fn remote_entity(&self, local: EntityId) -> Option<RemoteId> {
        match &self.side {
            Side::Client(client) => client.ids().remote(local),
            Side::Server(_) => None,
        }
    }

    /// Connection state. `None` on a server.
    #[must_use]
    pub fn client_state(&self) -> Option<ClientState> {
        match &self.side {
            Side::Client(client) => Some(client.connection_state()),
            Side::Server(_) => None,
        }
    }

    /// Leaves the server, despawning every mirrored entity and failing
    /// every pending spawn.
    ///
    /// # Errors
    ///
    /// Fails on a server instance.
    pub fn disconnect(&mut self, scene: &mut SceneManager) -> NetResult<()> {
        let Side::Client(client) = &mut self.side else {
            return Err(NetError::NotClient);
        };
        client.disconnect(&self.shared, scene);
        Ok(())
    }

    /// Stops the server, or disconnects the client.
    pub fn stop(&mut self, scene: &mut SceneManager) {
        match &mut self.side {
            Side::Server(server) => server.stop(&self.shared, scene),
            Side::Client(client) => client.disconnect(&self.shared, scene),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support;
