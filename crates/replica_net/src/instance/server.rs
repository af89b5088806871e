//! Server side of the replication protocol.
//!
//! Per frame:
//!
//! 1. pump the transport
//! 2. handle connects (late-join sync) and disconnects (ownership revoke)
//! 3. drain every client's inbound messages
//! 4. forward queued client-direction RPCs to their owners
//! 5. broadcast `PropertyUpdate` for every replicated entity

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use replica_core::{EntityId, SceneManager};
use tracing::{debug, info, trace, warn};

use super::{NetEvent, Shared, TransportEvent};
use crate::config::UpdatePolicy;
use crate::error::{NetError, NetResult};
use crate::net_data::{CNetData, OutgoingRpc};
use crate::protocol::NetMessage;
use crate::stream::Writer;
use crate::transport::{
    ServerState, TransportError, TransportResult, TransportServer, TransportStats,
};
use crate::types::{ClientId, EntityType, NetRole, RemoteId, RpcDirection, RpcId, SpawnRequestId};

/// Bookkeeping for one replicated entity.
#[derive(Clone, Copy, Debug)]
struct Replica {
    entity_type: EntityType,
    owner: Option<ClientId>,
}

impl Replica {
    /// Role `client` holds for this entity.
    fn role_of(&self, client: ClientId) -> NetRole {
        if self.owner == Some(client) {
            NetRole::AuthoritativeProxy
        } else {
            NetRole::Proxy
        }
    }

    /// Role the server records as the entity's remote role.
    fn remote_role(&self) -> NetRole {
        if self.owner.is_some() {
            NetRole::AuthoritativeProxy
        } else {
            NetRole::Proxy
        }
    }
}

pub(super) struct ServerSide {
    transport: Box<dyn TransportServer>,
    /// Clients announced through transport events, in id order.
    clients: BTreeSet<ClientId>,
    replicated: BTreeMap<EntityId, Replica>,
    /// Last property payload sent per (client, entity), for `OnChange`.
    last_sent: HashMap<(ClientId, EntityId), Vec<u8>>,
}

impl ServerSide {
    pub(super) fn new(transport: Box<dyn TransportServer>) -> Self {
        Self {
            transport,
            clients: BTreeSet::new(),
            replicated: BTreeMap::new(),
            last_sent: HashMap::new(),
        }
    }

    pub(super) fn listen(&mut self, host: &str, port: u16, max: usize) -> TransportResult<()> {
        self.transport.listen(host, port, max)
    }

    pub(super) fn connection_state(&self) -> ServerState {
        self.transport.connection_state()
    }

    pub(super) fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub(super) fn clients(&self) -> Vec<ClientId> {
        self.clients.iter().copied().collect()
    }

    pub(super) fn is_replicated(&self, entity: EntityId) -> bool {
        self.replicated.contains_key(&entity)
    }

    pub(super) fn replicated_entities(&self) -> Vec<EntityId> {
        self.replicated.keys().copied().collect()
    }

    pub(super) fn owner(&self, entity: EntityId) -> Option<ClientId> {
        self.replicated.get(&entity).and_then(|r| r.owner)
    }

    pub(super) fn kick(&mut self, client: ClientId) {
        info!(%client, "kicking client");
        self.transport.disconnect(client);
    }

    pub(super) fn stop(&mut self, shared: &Shared, scene: &mut SceneManager) {
        self.transport.stop();
        // Connects still queued were never announced; only departures matter.
        for event in shared.transport_events.try_iter() {
            if let TransportEvent::ClientDisconnected(client) = event {
                self.client_disconnected(shared, client);
                self.revoke_ownership(scene, client);
            }
        }
        for client in std::mem::take(&mut self.clients) {
            self.client_disconnected_inner(shared, client);
            self.revoke_ownership(scene, client);
        }
        info!("net server stopped");
    }

    fn send(&mut self, client: ClientId, message: &NetMessage) {
        self.send_bytes(client, &message.encode());
    }

    fn send_bytes(&mut self, client: ClientId, bytes: &[u8]) {
        if let Err(error) = self.transport.send(client, bytes) {
            warn!(%client, %error, "send failed, message dropped");
        }
    }

    // ---------------------------------------------------------------------
    // Replication control
    // ---------------------------------------------------------------------

    pub(super) fn replicate(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        entity: EntityId,
        entity_type: EntityType,
        owner: Option<ClientId>,
    ) -> NetResult<()> {
        if self.replicated.contains_key(&entity) {
            debug!(%entity, "entity already replicated");
            return Ok(());
        }
        if let Some(client) = owner {
            if !self.clients.contains(&client) {
                return Err(TransportError::UnknownClient(client).into());
            }
        }

        let replica = Replica { entity_type, owner };
        let payload = {
            let found = scene
                .find_entity_mut(entity)
                .ok_or(NetError::EntityNotFound(entity))?;
            let mut out = Writer::new();
            CNetData::serialise(found, &mut out)?;
            if let Some(data) = found.component_mut::<CNetData>() {
                data.set_remote_role(replica.remote_role());
            }
            out.into_inner()
        };

        self.replicated.insert(entity, replica);
        info!(%entity, %entity_type, owner = ?owner, "replicating entity");

        let clients: Vec<ClientId> = self.clients.iter().copied().collect();
        for client in clients {
            self.send_create(shared, client, entity, replica, &payload);
        }
        Ok(())
    }

    fn send_create(
        &mut self,
        shared: &Shared,
        client: ClientId,
        entity: EntityId,
        replica: Replica,
        payload: &[u8],
    ) {
        let message = NetMessage::CreateEntity {
            entity_id: RemoteId::from_server_entity(entity),
            entity_type: replica.entity_type,
            role: replica.role_of(client),
            payload: payload.to_vec(),
        };
        self.send(client, &message);
        if shared.config.update_policy == UpdatePolicy::OnChange {
            self.last_sent.insert((client, entity), payload.to_vec());
        }
    }

    pub(super) fn stop_replicating(&mut self, entity: EntityId) -> NetResult<()> {
        if self.replicated.remove(&entity).is_none() {
            return Err(NetError::NotReplicated(entity));
        }
        self.last_sent.retain(|(_, e), _| *e != entity);
        info!(%entity, "stopped replicating entity");

        let message = NetMessage::DestroyEntity {
            entity_id: RemoteId::from_server_entity(entity),
        }
        .encode();
        let clients: Vec<ClientId> = self.clients.iter().copied().collect();
        for client in clients {
            self.send_bytes(client, &message);
        }
        Ok(())
    }

    pub(super) fn set_owner(
        &mut self,
        scene: &mut SceneManager,
        entity: EntityId,
        owner: Option<ClientId>,
    ) -> NetResult<()> {
        let replica = self
            .replicated
            .get(&entity)
            .copied()
            .ok_or(NetError::NotReplicated(entity))?;
        if let Some(client) = owner {
            if !self.clients.contains(&client) {
                return Err(TransportError::UnknownClient(client).into());
            }
        }
        if replica.owner == owner {
            return Ok(());
        }
        self.assign_owner(scene, entity, owner);
        Ok(())
    }

    /// Records the new owner and tells the previous and new owners their roles.
    fn assign_owner(&mut self, scene: &mut SceneManager, entity: EntityId, owner: Option<ClientId>) {
        let Some(replica) = self.replicated.get_mut(&entity) else {
            return;
        };
        let previous = std::mem::replace(&mut replica.owner, owner);
        let remote_role = replica.remote_role();
        if let Some(data) = scene
            .find_entity_mut(entity)
            .and_then(|e| e.component_mut::<CNetData>())
        {
            data.set_remote_role(remote_role);
        }
        info!(%entity, ?previous, ?owner, "entity ownership changed");

        let entity_id = RemoteId::from_server_entity(entity);
        if let Some(client) = previous.filter(|c| self.clients.contains(c)) {
            self.send(
                client,
                &NetMessage::SetRole {
                    entity_id,
                    role: NetRole::Proxy,
                },
            );
        }
        if let Some(client) = owner {
            self.send(
                client,
                &NetMessage::SetRole {
                    entity_id,
                    role: NetRole::AuthoritativeProxy,
                },
            );
        }
    }

    // ---------------------------------------------------------------------
    // Frame
    // ---------------------------------------------------------------------

    pub(super) fn update(&mut self, shared: &Shared, scene: &mut SceneManager, dt: Duration) {
        self.transport.update(dt);

        for event in shared.transport_events.try_iter() {
            match event {
                TransportEvent::ClientConnected(client) => {
                    self.client_connected(shared, scene, client);
                }
                TransportEvent::ClientDisconnected(client) => {
                    self.client_disconnected(shared, client);
                    self.revoke_ownership(scene, client);
                }
                other => debug!(?other, "client transport event on server ignored"),
            }
        }

        let clients: Vec<ClientId> = self.clients.iter().copied().collect();
        for client in clients {
            while let Some(bytes) = self.transport.receive(client) {
                self.handle_message(shared, scene, client, &bytes);
            }
        }

        for rpc in shared.outbox.try_iter() {
            self.forward_rpc(rpc);
        }

        self.broadcast_properties(shared, scene);
    }

    fn client_connected(&mut self, shared: &Shared, scene: &mut SceneManager, client: ClientId) {
        if !self.clients.insert(client) {
            return;
        }
        info!(%client, "client joined");
        shared.emit(NetEvent::ServerClientConnected { client_id: client });

        if !shared.config.sync_on_connect {
            return;
        }
        let replicas: Vec<(EntityId, Replica)> =
            self.replicated.iter().map(|(e, r)| (*e, *r)).collect();
        for (entity, replica) in replicas {
            let Some(found) = scene.find_entity(entity) else {
                continue;
            };
            let mut out = Writer::new();
            match CNetData::serialise(found, &mut out) {
                Ok(()) => self.send_create(shared, client, entity, replica, out.as_slice()),
                Err(error) => warn!(%entity, %client, %error, "late-join sync skipped entity"),
            }
        }
    }

    fn client_disconnected(&mut self, shared: &Shared, client: ClientId) {
        if self.clients.remove(&client) {
            self.client_disconnected_inner(shared, client);
        }
    }

    fn client_disconnected_inner(&mut self, shared: &Shared, client: ClientId) {
        self.last_sent.retain(|(c, _), _| *c != client);
        for replica in self.replicated.values_mut() {
            if replica.owner == Some(client) {
                replica.owner = None;
            }
        }
        info!(%client, "client left");
        shared.emit(NetEvent::ServerClientDisconnected { client_id: client });
    }

    /// Resets the remote role of entities whose owner just left.
    fn revoke_ownership(&mut self, scene: &mut SceneManager, client: ClientId) {
        for (entity, replica) in &self.replicated {
            if replica.owner.is_some() {
                continue;
            }
            if let Some(data) = scene
                .find_entity_mut(*entity)
                .and_then(|e| e.component_mut::<CNetData>())
            {
                if data.remote_role() == NetRole::AuthoritativeProxy {
                    debug!(entity = %entity, %client, "ownership revoked");
                    data.set_remote_role(NetRole::Proxy);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    fn handle_message(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        client: ClientId,
        bytes: &[u8],
    ) {
        let message = match NetMessage::decode(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(%client, %error, len = bytes.len(), "undecodable message dropped");
                return;
            }
        };
        if !message.kind().server_accepts() {
            warn!(%client, kind = ?message.kind(), "message not valid on a server, dropped");
            return;
        }
        match message {
            NetMessage::SpawnRequest {
                request_id,
                entity_type,
                authoritative_proxy,
            } => self.handle_spawn_request(
                shared,
                scene,
                client,
                request_id,
                entity_type,
                authoritative_proxy,
            ),
            NetMessage::Rpc {
                entity_id,
                rpc_id,
                payload,
            } => self.handle_rpc(shared, scene, client, entity_id, rpc_id, &payload),
            _ => {}
        }
    }

    fn handle_spawn_request(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        client: ClientId,
        request_id: SpawnRequestId,
        entity_type: EntityType,
        authoritative_proxy: bool,
    ) {
        let id = scene.reserve_entity_id();
        let created = shared
            .pipeline
            .lock()
            .create_entity_from_type(scene, id, entity_type, NetRole::Authority, &shared.handle)
            .is_some();

        let entity_id = if created {
            let owner = authoritative_proxy.then_some(client);
            match self.replicate(shared, scene, id, entity_type, owner) {
                Ok(()) => RemoteId::from_server_entity(id),
                Err(error) => {
                    warn!(%client, %request_id, %entity_type, %error, "spawned entity cannot be replicated");
                    scene.despawn(id);
                    RemoteId::NULL
                }
            }
        } else {
            warn!(%client, %request_id, %entity_type, "spawn request failed in entity pipeline");
            RemoteId::NULL
        };

        debug!(%client, %request_id, %entity_id, "spawn response");
        self.send(
            client,
            &NetMessage::SpawnResponse {
                request_id,
                entity_id,
            },
        );
    }

    fn handle_rpc(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        client: ClientId,
        entity_id: RemoteId,
        rpc: RpcId,
        payload: &[u8],
    ) {
        let entity = EntityId::new(entity_id.0);
        let Some(replica) = self.replicated.get(&entity) else {
            warn!(%client, %entity_id, %rpc, "rpc for unreplicated entity dropped");
            return;
        };
        if shared.config.require_rpc_ownership && replica.owner != Some(client) {
            warn!(%client, %entity, %rpc, owner = ?replica.owner, "rpc from non-owner dropped");
            return;
        }
        let Some(target) = scene.find_entity_mut(entity) else {
            warn!(%client, %entity, %rpc, "rpc target missing from scene, dropped");
            return;
        };
        let direction = target
            .component::<CNetData>()
            .and_then(|data| data.layout().rpc(rpc).map(|b| b.direction()));
        match direction {
            Some(RpcDirection::Server) => {
                if let Err(error) = CNetData::receive_rpc(target, rpc, payload) {
                    warn!(%client, %entity, %rpc, %error, "rpc dropped");
                }
            }
            Some(RpcDirection::Client) => {
                warn!(%client, %entity, %rpc, "client rpc sent to server, dropped");
            }
            None => warn!(%client, %entity, %rpc, "unknown rpc dropped"),
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    fn forward_rpc(&mut self, rpc: OutgoingRpc) {
        if rpc.direction != RpcDirection::Client {
            warn!(entity = %rpc.entity, rpc = %rpc.rpc, "server rpc queued on server, dropped");
            return;
        }
        let Some(replica) = self.replicated.get(&rpc.entity) else {
            warn!(entity = %rpc.entity, rpc = %rpc.rpc, "client rpc on unreplicated entity dropped");
            return;
        };
        let Some(owner) = replica.owner else {
            warn!(entity = %rpc.entity, rpc = %rpc.rpc, "client rpc on unowned entity dropped");
            return;
        };
        trace!(entity = %rpc.entity, rpc = %rpc.rpc, %owner, "forwarding client rpc");
        self.send(
            owner,
            &NetMessage::Rpc {
                entity_id: RemoteId::from_server_entity(rpc.entity),
                rpc_id: rpc.rpc,
                payload: rpc.payload,
            },
        );
    }

    fn broadcast_properties(&mut self, shared: &Shared, scene: &SceneManager) {
        let mut vanished = Vec::new();
        let mut out = Writer::new();
        let entities: Vec<EntityId> = self.replicated.keys().copied().collect();

        for entity in entities {
            let Some(found) = scene.find_entity(entity) else {
                vanished.push(entity);
                continue;
            };
            out.clear();
            if let Err(error) = CNetData::serialise(found, &mut out) {
                warn!(%entity, %error, "entity cannot be serialised, update skipped");
                continue;
            }
            let payload = out.as_slice();
            let message = NetMessage::PropertyUpdate {
                entity_id: RemoteId::from_server_entity(entity),
                payload: payload.to_vec(),
            }
            .encode();

            let clients: Vec<ClientId> = self.clients.iter().copied().collect();
            for client in clients {
                if shared.config.update_policy == UpdatePolicy::OnChange {
                    let key = (client, entity);
                    if self.last_sent.get(&key).is_some_and(|last| last == payload) {
                        continue;
                    }
                    self.last_sent.insert(key, payload.to_vec());
                }
                trace!(%entity, %client, len = message.len(), "property update");
                self.send_bytes(client, &message);
            }
        }

        for entity in vanished {
            warn!(%entity, "replicated entity left the scene");
            // The entity was in the set a moment ago.
            let _ = self.stop_replicating(entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use replica_core::EventChannel;

    use super::super::test_support::*;
    use super::super::{NetEvent, NetInstance};
    use super::*;
    use crate::config::NetConfig;
    use crate::stream::to_bytes;
    use crate::transport::in_process::{InProcessClient, InProcessRegistry, InProcessServer};
    use crate::transport::TransportClient;

    const PORT: u16 = 9000;

    struct Fixture {
        ports: InProcessRegistry,
        server: NetInstance,
        scene: SceneManager,
        events: Arc<EventChannel<NetEvent>>,
    }

    fn server_with(config: NetConfig, pipeline: super::super::SharedPipeline) -> Fixture {
        let ports = InProcessRegistry::new();
        let events = event_channel();
        let mut server = NetInstance::server(
            InProcessServer::new(ports.clone()),
            pipeline,
            events.clone(),
            config,
        );
        server.listen("localhost", PORT).unwrap();
        Fixture {
            ports,
            server,
            scene: SceneManager::new(),
            events,
        }
    }

    fn server() -> Fixture {
        server_with(NetConfig::default(), ship_pipeline().0)
    }

    /// Connects a transport-level client and lets the server see it.
    fn raw_client(f: &mut Fixture) -> InProcessClient {
        let mut raw = InProcessClient::new(f.ports.clone());
        raw.connect("localhost", PORT).unwrap();
        f.server.update(&mut f.scene, FRAME);
        raw.update(FRAME);
        raw
    }

    fn inbox(raw: &mut InProcessClient) -> Vec<NetMessage> {
        std::iter::from_fn(|| raw.receive())
            .map(|b| NetMessage::decode(&b).unwrap())
            .collect()
    }

    /// Builds a ship on the server with the server's own handle.
    fn server_ship(f: &mut Fixture) -> EntityId {
        let (_, types) = ship_pipeline();
        let id = f.scene.reserve_entity_id();
        let handle = f.server.handle().clone();
        let types = types.lock();
        types
            .spawn(&mut f.scene, id, ship_type(), NetRole::Authority, &handle)
            .unwrap();
        id
    }

    fn set_points(f: &mut Fixture, entity: EntityId, points: u32) {
        f.scene
            .find_entity_mut(entity)
            .and_then(|e| e.component_mut::<Hull>())
            .unwrap()
            .points = points;
    }

    #[test]
    fn test_replicate_sends_create_then_updates() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);

        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), None)
            .unwrap();
        assert!(f.server.is_replicated(ship));
        assert_eq!(
            inbox(&mut raw),
            vec![NetMessage::CreateEntity {
                entity_id: RemoteId::from_server_entity(ship),
                entity_type: ship_type(),
                role: NetRole::Proxy,
                payload: to_bytes(&100u32),
            }]
        );

        f.server.update(&mut f.scene, FRAME);
        f.server.update(&mut f.scene, FRAME);
        let updates = inbox(&mut raw);
        assert_eq!(updates.len(), 2);
        assert!(updates
            .iter()
            .all(|m| matches!(m, NetMessage::PropertyUpdate { .. })));
    }

    #[test]
    fn test_replicate_twice_is_a_no_op() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);

        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        assert_eq!(inbox(&mut raw).len(), 1);
        assert_eq!(f.server.replicated_entities(), vec![ship]);
    }

    #[test]
    fn test_replicate_requires_net_data() {
        let mut f = server();
        let plain = f.scene.spawn().id();
        assert!(matches!(
            f.server.replicate_entity(&mut f.scene, plain, ship_type(), None),
            Err(NetError::MissingNetData(_))
        ));
        assert!(matches!(
            f.server
                .replicate_entity(&mut f.scene, EntityId::new(999), ship_type(), None),
            Err(NetError::EntityNotFound(_))
        ));
        assert!(!f.server.is_replicated(plain));
    }

    #[test]
    fn test_failed_spawn_request_answers_null() {
        let mut f = server_with(NetConfig::default(), empty_pipeline());
        let mut raw = raw_client(&mut f);

        let request = NetMessage::SpawnRequest {
            request_id: SpawnRequestId(3),
            entity_type: ship_type(),
            authoritative_proxy: true,
        };
        raw.send(&request.encode()).unwrap();
        f.server.update(&mut f.scene, FRAME);

        assert!(f.scene.is_empty());
        assert!(f.server.replicated_entities().is_empty());
        assert_eq!(
            inbox(&mut raw),
            vec![NetMessage::SpawnResponse {
                request_id: SpawnRequestId(3),
                entity_id: RemoteId::NULL,
            }]
        );
    }

    #[test]
    fn test_spawn_request_creates_owned_entity() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let mut other = raw_client(&mut f);

        let request = NetMessage::SpawnRequest {
            request_id: SpawnRequestId(1),
            entity_type: ship_type(),
            authoritative_proxy: true,
        };
        raw.send(&request.encode()).unwrap();
        f.server.update(&mut f.scene, FRAME);

        let ship = f.server.replicated_entities()[0];
        let remote = RemoteId::from_server_entity(ship);
        assert_eq!(f.server.owner(ship), Some(ClientId(0)));
        let data = f.scene.find_entity(ship).unwrap().component::<CNetData>().unwrap();
        assert_eq!(data.role(), NetRole::Authority);
        assert_eq!(data.remote_role(), NetRole::AuthoritativeProxy);

        let messages = inbox(&mut raw);
        assert!(matches!(
            messages[0],
            NetMessage::CreateEntity { entity_id, role: NetRole::AuthoritativeProxy, .. } if entity_id == remote
        ));
        assert_eq!(
            messages[1],
            NetMessage::SpawnResponse {
                request_id: SpawnRequestId(1),
                entity_id: remote,
            }
        );
        assert!(matches!(
            inbox(&mut other)[0],
            NetMessage::CreateEntity { role: NetRole::Proxy, .. }
        ));
    }

    #[test]
    fn test_server_rpc_from_client_runs() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();

        let rpc = NetMessage::Rpc {
            entity_id: RemoteId::from_server_entity(ship),
            rpc_id: RpcId(0),
            payload: to_bytes(&5u32),
        };
        raw.send(&rpc.encode()).unwrap();
        // A client-direction rpc from a client is refused.
        let wrong_way = NetMessage::Rpc {
            entity_id: RemoteId::from_server_entity(ship),
            rpc_id: RpcId(1),
            payload: Vec::new(),
        };
        raw.send(&wrong_way.encode()).unwrap();
        f.server.update(&mut f.scene, FRAME);

        let hull = f.scene.find_entity(ship).unwrap().component::<Hull>().unwrap();
        assert_eq!(hull.points, 105);
        assert_eq!(hull.alarms, 0);
    }

    #[test]
    fn test_ownership_enforcement() {
        let config = NetConfig {
            require_rpc_ownership: true,
            ..NetConfig::default()
        };
        let mut f = server_with(config, ship_pipeline().0);
        let mut owner = raw_client(&mut f);
        let mut stranger = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), Some(ClientId(0)))
            .unwrap();

        let rpc = NetMessage::Rpc {
            entity_id: RemoteId::from_server_entity(ship),
            rpc_id: RpcId(0),
            payload: to_bytes(&1u32),
        }
        .encode();
        stranger.send(&rpc).unwrap();
        f.server.update(&mut f.scene, FRAME);
        assert_eq!(f.scene.find_entity(ship).unwrap().component::<Hull>().unwrap().points, 100);

        owner.send(&rpc).unwrap();
        f.server.update(&mut f.scene, FRAME);
        assert_eq!(f.scene.find_entity(ship).unwrap().component::<Hull>().unwrap().points, 101);
    }

    #[test]
    fn test_server_rpc_runs_before_send_returns() {
        let mut f = server();
        let ship = server_ship(&mut f);
        f.server.send_rpc(&mut f.scene, ship, REPAIR, &9).unwrap();
        assert_eq!(f.scene.find_entity(ship).unwrap().component::<Hull>().unwrap().points, 109);
    }

    #[test]
    fn test_client_rpc_goes_to_owner_only() {
        let mut f = server();
        let mut owner = raw_client(&mut f);
        let mut other = raw_client(&mut f);
        let ship = server_ship(&mut f);
        let unowned = server_ship(&mut f);
        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), Some(ClientId(0)))
            .unwrap();
        f.server.replicate_entity(&mut f.scene, unowned, ship_type(), None).unwrap();
        inbox(&mut owner);
        inbox(&mut other);

        f.server.send_rpc(&mut f.scene, ship, ALARM, &()).unwrap();
        f.server.send_rpc(&mut f.scene, unowned, ALARM, &()).unwrap();
        f.server.update(&mut f.scene, FRAME);

        let rpcs = |messages: Vec<NetMessage>| {
            messages
                .into_iter()
                .filter(|m| matches!(m, NetMessage::Rpc { .. }))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            rpcs(inbox(&mut owner)),
            vec![NetMessage::Rpc {
                entity_id: RemoteId::from_server_entity(ship),
                rpc_id: RpcId(1),
                payload: Vec::new(),
            }]
        );
        assert!(rpcs(inbox(&mut other)).is_empty());
    }

    #[test]
    fn test_destroy_entity_broadcasts() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        inbox(&mut raw);

        f.server.destroy_entity(&mut f.scene, ship).unwrap();
        assert!(f.scene.find_entity(ship).is_none());
        assert!(!f.server.is_replicated(ship));
        assert_eq!(
            inbox(&mut raw),
            vec![NetMessage::DestroyEntity {
                entity_id: RemoteId::from_server_entity(ship)
            }]
        );
        assert!(matches!(
            f.server.destroy_entity(&mut f.scene, ship),
            Err(NetError::NotReplicated(_))
        ));
    }

    #[test]
    fn test_stop_replicating_keeps_entity() {
        let mut f = server();
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        f.server.stop_replicating(ship).unwrap();
        assert!(f.scene.find_entity(ship).is_some());
        assert!(!f.server.is_replicated(ship));
    }

    #[test]
    fn test_vanished_entity_is_destroyed_for_clients() {
        let mut f = server();
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        inbox(&mut raw);

        f.scene.despawn(ship);
        f.server.update(&mut f.scene, FRAME);
        assert!(!f.server.is_replicated(ship));
        assert_eq!(
            inbox(&mut raw),
            vec![NetMessage::DestroyEntity {
                entity_id: RemoteId::from_server_entity(ship)
            }]
        );
    }

    #[test]
    fn test_set_owner_sends_roles() {
        let mut f = server();
        let mut first = raw_client(&mut f);
        let mut second = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), Some(ClientId(0)))
            .unwrap();
        inbox(&mut first);
        inbox(&mut second);

        f.server.set_owner(&mut f.scene, ship, Some(ClientId(1))).unwrap();
        let entity_id = RemoteId::from_server_entity(ship);
        assert_eq!(
            inbox(&mut first),
            vec![NetMessage::SetRole { entity_id, role: NetRole::Proxy }]
        );
        assert_eq!(
            inbox(&mut second),
            vec![NetMessage::SetRole { entity_id, role: NetRole::AuthoritativeProxy }]
        );
        assert_eq!(f.server.owner(ship), Some(ClientId(1)));

        assert!(f.server.set_owner(&mut f.scene, ship, Some(ClientId(7))).is_err());
    }

    #[test]
    fn test_owner_disconnect_revokes_ownership() {
        let mut f = server();
        let mut owner = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), Some(ClientId(0)))
            .unwrap();
        f.events.drain();

        owner.disconnect();
        f.server.update(&mut f.scene, FRAME);

        assert_eq!(f.server.owner(ship), None);
        let data = f.scene.find_entity(ship).unwrap().component::<CNetData>().unwrap();
        assert_eq!(data.remote_role(), NetRole::Proxy);
        assert_eq!(
            f.events.drain(),
            vec![NetEvent::ServerClientDisconnected { client_id: ClientId(0) }]
        );
    }

    #[test]
    fn test_late_join_receives_existing_entities() {
        let mut f = server();
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        set_points(&mut f, ship, 42);

        let mut late = raw_client(&mut f);
        let messages = inbox(&mut late);
        assert_eq!(
            messages[0],
            NetMessage::CreateEntity {
                entity_id: RemoteId::from_server_entity(ship),
                entity_type: ship_type(),
                role: NetRole::Proxy,
                payload: to_bytes(&42u32),
            }
        );
    }

    #[test]
    fn test_late_join_sync_can_be_disabled() {
        let config = NetConfig {
            sync_on_connect: false,
            ..NetConfig::default()
        };
        let mut f = server_with(config, ship_pipeline().0);
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();

        let mut late = raw_client(&mut f);
        assert!(inbox(&mut late)
            .iter()
            .all(|m| !matches!(m, NetMessage::CreateEntity { .. })));
    }

    #[test]
    fn test_on_change_policy_skips_unchanged_state() {
        let config = NetConfig {
            update_policy: UpdatePolicy::OnChange,
            ..NetConfig::default()
        };
        let mut f = server_with(config, ship_pipeline().0);
        let mut raw = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server.replicate_entity(&mut f.scene, ship, ship_type(), None).unwrap();
        inbox(&mut raw);

        f.server.update(&mut f.scene, FRAME);
        assert!(inbox(&mut raw).is_empty());

        set_points(&mut f, ship, 1);
        f.server.update(&mut f.scene, FRAME);
        f.server.update(&mut f.scene, FRAME);
        assert_eq!(
            inbox(&mut raw),
            vec![NetMessage::PropertyUpdate {
                entity_id: RemoteId::from_server_entity(ship),
                payload: to_bytes(&1u32),
            }]
        );
    }

    #[test]
    fn test_stop_announces_departures() {
        let mut f = server();
        let _raw = raw_client(&mut f);
        f.events.drain();

        f.server.stop(&mut f.scene);
        assert!(f.server.clients().is_empty());
        assert_eq!(f.server.server_state(), Some(ServerState::NotListening));
        assert_eq!(
            f.events.drain(),
            vec![NetEvent::ServerClientDisconnected { client_id: ClientId(0) }]
        );
    }

    #[test]
    fn test_stop_revokes_ownership() {
        let mut f = server();
        let _owner = raw_client(&mut f);
        let ship = server_ship(&mut f);
        f.server
            .replicate_entity(&mut f.scene, ship, ship_type(), Some(ClientId(0)))
            .unwrap();

        f.server.stop(&mut f.scene);

        assert_eq!(f.server.owner(ship), None);
        let data = f.scene.find_entity(ship).unwrap().component::<CNetData>().unwrap();
        assert_eq!(data.remote_role(), NetRole::Proxy);
    }
}
