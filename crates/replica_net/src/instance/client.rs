//! Client side of the replication protocol.
//!
//! The client mirrors server entities. Every mirror is created through the
//! entity pipeline under a locally reserved id and recorded in an
//! [`EntityIdMap`]; the server's ids never enter the local scene.

use std::time::Duration;

use replica_core::{Entity, EntityId, SceneManager};
use tracing::{debug, info, trace, warn};

use super::id_map::EntityIdMap;
use super::spawn::{ResponseOutcome, SpawnCallback, SpawnTracker};
use super::{NetEvent, Shared, TransportEvent};
use crate::error::{NetError, NetResult};
use crate::net_data::{CNetData, OutgoingRpc};
use crate::protocol::NetMessage;
use crate::stream::Reader;
use crate::transport::{ClientState, TransportClient, TransportError, TransportResult, TransportStats};
use crate::types::{EntityType, NetRole, RemoteId, RpcDirection, RpcId, SpawnRequestId};

pub(super) struct ClientSide {
    transport: Box<dyn TransportClient>,
    ids: EntityIdMap,
    spawns: SpawnTracker,
}

impl ClientSide {
    pub(super) fn new(transport: Box<dyn TransportClient>) -> Self {
        Self {
            transport,
            ids: EntityIdMap::new(),
            spawns: SpawnTracker::new(),
        }
    }

    pub(super) fn connect(&mut self, host: &str, port: u16) -> TransportResult<()> {
        self.transport.connect(host, port)
    }

    pub(super) fn connection_state(&self) -> ClientState {
        self.transport.connection_state()
    }

    pub(super) fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub(super) fn ids(&self) -> &EntityIdMap {
        &self.ids
    }

    pub(super) fn pending_spawns(&self) -> usize {
        self.spawns.len()
    }

    pub(super) fn disconnect(&mut self, shared: &Shared, scene: &mut SceneManager) {
        self.transport.disconnect();
        self.handle_transport_events(shared, scene);
    }

    pub(super) fn spawn_entity(
        &mut self,
        entity_type: EntityType,
        authoritative_proxy: bool,
        callback: SpawnCallback,
    ) -> NetResult<SpawnRequestId> {
        if self.transport.connection_state() != ClientState::Connected {
            return Err(TransportError::NotConnected.into());
        }
        let request_id = self.spawns.begin(entity_type, callback);
        let message = NetMessage::SpawnRequest {
            request_id,
            entity_type,
            authoritative_proxy,
        };
        if let Err(error) = self.transport.send(&message.encode()) {
            self.spawns.cancel(request_id);
            return Err(error.into());
        }
        debug!(%request_id, %entity_type, authoritative_proxy, "spawn requested");
        Ok(request_id)
    }

    // ---------------------------------------------------------------------
    // Frame
    // ---------------------------------------------------------------------

    pub(super) fn update(&mut self, shared: &Shared, scene: &mut SceneManager, dt: Duration) {
        self.transport.update(dt);
        self.handle_transport_events(shared, scene);

        while let Some(bytes) = self.transport.receive() {
            self.handle_message(shared, scene, &bytes);
        }

        for rpc in shared.outbox.try_iter() {
            self.forward_rpc(rpc);
        }
    }

    fn handle_transport_events(&mut self, shared: &Shared, scene: &mut SceneManager) {
        for event in shared.transport_events.try_iter() {
            match event {
                TransportEvent::Connected => {
                    info!("joined server");
                    shared.emit(NetEvent::JoinServer);
                }
                TransportEvent::ConnectionFailed => {
                    warn!("connection to server failed");
                    self.teardown(shared, scene);
                    shared.emit(NetEvent::ConnectionFailed);
                }
                TransportEvent::Disconnected => {
                    info!("left server");
                    self.teardown(shared, scene);
                    shared.emit(NetEvent::LeftServer);
                }
                other => debug!(?other, "server transport event on client ignored"),
            }
        }
    }

    /// Drops every mirror and fails every pending spawn.
    fn teardown(&mut self, shared: &Shared, scene: &mut SceneManager) {
        let mirrors = self.ids.clear();
        if !mirrors.is_empty() {
            debug!(count = mirrors.len(), "despawning mirrored entities");
        }
        for local in mirrors {
            scene.despawn(local);
        }
        for request_id in self.spawns.clear() {
            warn!(%request_id, "spawn abandoned on disconnect");
            shared.emit(NetEvent::SpawnFailed { request_id });
        }
        // Queued RPCs target a server that is gone.
        let dropped = shared.outbox.try_iter().count();
        if dropped > 0 {
            debug!(dropped, "queued rpcs discarded");
        }
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    fn handle_message(&mut self, shared: &Shared, scene: &mut SceneManager, bytes: &[u8]) {
        let message = match NetMessage::decode(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, len = bytes.len(), "undecodable message dropped");
                return;
            }
        };
        if !message.kind().client_accepts() {
            warn!(kind = ?message.kind(), "message not valid on a client, dropped");
            return;
        }
        match message {
            NetMessage::CreateEntity {
                entity_id,
                entity_type,
                role,
                payload,
            } => self.handle_create(shared, scene, entity_id, entity_type, role, &payload),
            NetMessage::PropertyUpdate { entity_id, payload } => {
                self.handle_property_update(scene, entity_id, &payload);
            }
            NetMessage::SpawnResponse {
                request_id,
                entity_id,
            } => self.handle_spawn_response(shared, scene, request_id, entity_id),
            NetMessage::DestroyEntity { entity_id } => {
                self.handle_destroy(shared, scene, entity_id);
            }
            NetMessage::SetRole { entity_id, role } => self.handle_set_role(scene, entity_id, role),
            NetMessage::Rpc {
                entity_id,
                rpc_id,
                payload,
            } => self.handle_rpc(scene, entity_id, rpc_id, &payload),
            NetMessage::SpawnRequest { .. } => {}
        }
    }

    fn handle_create(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        remote: RemoteId,
        entity_type: EntityType,
        role: NetRole,
        payload: &[u8],
    ) {
        if let Some(existing) = self.ids.local(remote) {
            warn!(%remote, local = %existing, "duplicate create dropped");
            return;
        }

        let local = scene.reserve_entity_id();
        let created = shared
            .pipeline
            .lock()
            .create_entity_from_type(scene, local, entity_type, role, &shared.handle)
            .is_some();
        let initialised = if created {
            match scene.find_entity_mut(local) {
                Some(entity) => init_mirror(entity, role, payload),
                None => Err(NetError::EntityNotFound(local)),
            }
        } else {
            Err(NetError::UnknownEntityType(entity_type))
        };
        if let Err(error) = initialised {
            warn!(%remote, %entity_type, %error, "remote entity cannot be mirrored");
            scene.despawn(local);
            if let Some(request_id) = self.spawns.fail_remote(remote) {
                shared.emit(NetEvent::SpawnFailed { request_id });
            }
            return;
        }

        self.ids.insert(remote, local);
        debug!(%remote, %local, %entity_type, ?role, "remote entity mirrored");

        if let Some((request_id, callback)) = self.spawns.on_entity_created(remote) {
            if let Some(entity) = scene.find_entity_mut(local) {
                debug!(%request_id, %local, "spawn complete");
                callback(entity);
            }
        }
    }

    fn handle_property_update(&mut self, scene: &mut SceneManager, remote: RemoteId, payload: &[u8]) {
        let Some(local) = self.ids.local(remote) else {
            warn!(%remote, "property update for unmapped entity dropped");
            return;
        };
        let Some(entity) = scene.find_entity_mut(local) else {
            warn!(%remote, %local, "property update for despawned mirror dropped");
            return;
        };
        let mut input = Reader::new(payload);
        match CNetData::deserialise(entity, &mut input) {
            Ok(()) if input.is_empty() => trace!(%remote, %local, "properties updated"),
            Ok(()) => warn!(%remote, remaining = input.remaining(), "property update longer than layout"),
            Err(error) => warn!(%remote, %local, %error, "property update failed"),
        }
    }

    fn handle_spawn_response(
        &mut self,
        shared: &Shared,
        scene: &mut SceneManager,
        request_id: SpawnRequestId,
        remote: RemoteId,
    ) {
        let local = if remote.is_null() {
            None
        } else {
            self.ids.local(remote)
        };
        match self.spawns.on_spawn_response(request_id, remote, local) {
            ResponseOutcome::Unknown => {
                warn!(%request_id, %remote, "spawn response for unknown request dropped");
            }
            ResponseOutcome::Failed(entity_type) => {
                warn!(%request_id, %entity_type, "server failed to spawn entity");
                shared.emit(NetEvent::SpawnFailed { request_id });
            }
            ResponseOutcome::Complete { local, callback } => match scene.find_entity_mut(local) {
                Some(entity) => {
                    debug!(%request_id, %local, "spawn complete");
                    callback(entity);
                }
                None => {
                    warn!(%request_id, %local, "spawned mirror left the scene before completion");
                    shared.emit(NetEvent::SpawnFailed { request_id });
                }
            },
            ResponseOutcome::Waiting => trace!(%request_id, %remote, "spawn waiting for entity"),
        }
    }

    fn handle_destroy(&mut self, shared: &Shared, scene: &mut SceneManager, remote: RemoteId) {
        let mirror = self.ids.remove_remote(remote);
        if let Some(local) = mirror {
            debug!(%remote, %local, "mirror destroyed");
            scene.despawn(local);
        }
        match self.spawns.fail_remote(remote) {
            Some(request_id) => {
                warn!(%remote, %request_id, "spawned entity destroyed before it arrived");
                shared.emit(NetEvent::SpawnFailed { request_id });
            }
            None if mirror.is_none() => warn!(%remote, "destroy for unmapped entity dropped"),
            None => {}
        }
    }

    fn handle_set_role(&mut self, scene: &mut SceneManager, remote: RemoteId, role: NetRole) {
        let data = self
            .ids
            .local(remote)
            .and_then(|local| scene.find_entity_mut(local))
            .and_then(|entity| entity.component_mut::<CNetData>());
        match data {
            Some(data) => {
                debug!(%remote, ?role, "role changed");
                data.set_role(role);
            }
            None => warn!(%remote, ?role, "role change for unmapped entity dropped"),
        }
    }

    fn handle_rpc(&mut self, scene: &mut SceneManager, remote: RemoteId, rpc: RpcId, payload: &[u8]) {
        let Some(entity) = self
            .ids
            .local(remote)
            .and_then(|local| scene.find_entity_mut(local))
        else {
            warn!(%remote, %rpc, "rpc for unmapped entity dropped");
            return;
        };
        let direction = entity
            .component::<CNetData>()
            .and_then(|data| data.layout().rpc(rpc).map(|b| b.direction()));
        match direction {
            Some(RpcDirection::Client) => {
                if let Err(error) = CNetData::receive_rpc(entity, rpc, payload) {
                    warn!(%remote, %rpc, %error, "rpc dropped");
                }
            }
            Some(RpcDirection::Server) => warn!(%remote, %rpc, "server rpc sent to client, dropped"),
            None => warn!(%remote, %rpc, "unknown rpc dropped"),
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    fn forward_rpc(&mut self, rpc: OutgoingRpc) {
        if rpc.direction != RpcDirection::Server {
            warn!(entity = %rpc.entity, rpc = %rpc.rpc, "client rpc on entity this client does not own, dropped");
            return;
        }
        let Some(remote) = self.ids.remote(rpc.entity) else {
            warn!(entity = %rpc.entity, rpc = %rpc.rpc, "rpc on unmirrored entity dropped");
            return;
        };
        let message = NetMessage::Rpc {
            entity_id: remote,
            rpc_id: rpc.rpc,
            payload: rpc.payload,
        };
        match self.transport.send(&message.encode()) {
            Ok(()) => trace!(%remote, rpc = %rpc.rpc, "rpc sent"),
            Err(error) => warn!(%remote, rpc = %rpc.rpc, %error, "rpc send failed, dropped"),
        }
    }
}

/// Applies the carried role and initial state to a fresh mirror.
fn init_mirror(entity: &mut Entity, role: NetRole, payload: &[u8]) -> NetResult<()> {
    let id = entity.id();
    let data = entity
        .component_mut::<CNetData>()
        .ok_or(NetError::MissingNetData(id))?;
    data.set_role(role);
    data.set_remote_role(NetRole::Authority);

    let mut input = Reader::new(payload);
    CNetData::deserialise(entity, &mut input)?;
    if !input.is_empty() {
        warn!(entity = %id, remaining = input.remaining(), "create payload longer than layout");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use replica_core::EventChannel;

    use super::super::test_support::*;
    use super::super::{NetEvent, NetInstance};
    use super::*;
    use crate::config::NetConfig;
    use crate::transport::ClientCallbacks;

    /// Client transport fed by hand.
    #[derive(Clone, Default)]
    struct Scripted {
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Scripted {
        fn push(&self, message: &NetMessage) {
            self.inbox.lock().push_back(message.encode());
        }

        fn sent(&self) -> Vec<NetMessage> {
            self.sent
                .lock()
                .iter()
                .map(|b| NetMessage::decode(b).unwrap())
                .collect()
        }
    }

    struct ScriptedTransport {
        script: Scripted,
        callbacks: ClientCallbacks,
        state: ClientState,
    }

    impl TransportClient for ScriptedTransport {
        fn connect(&mut self, _host: &str, _port: u16) -> TransportResult<()> {
            self.state = ClientState::Connecting;
            Ok(())
        }

        fn disconnect(&mut self) {
            if self.state == ClientState::Connected {
                self.state = ClientState::Disconnected;
                self.callbacks.fire_disconnected();
            }
        }

        fn update(&mut self, _dt: Duration) {
            if self.state == ClientState::Connecting {
                self.state = ClientState::Connected;
                self.callbacks.fire_connected();
            }
        }

        fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
            self.script.sent.lock().push(bytes.to_vec());
            Ok(())
        }

        fn receive(&mut self) -> Option<Vec<u8>> {
            self.script.inbox.lock().pop_front()
        }

        fn connection_state(&self) -> ClientState {
            self.state
        }

        fn set_callbacks(&mut self, callbacks: ClientCallbacks) {
            self.callbacks = callbacks;
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    struct Fixture {
        client: NetInstance,
        script: Scripted,
        scene: SceneManager,
        events: Arc<EventChannel<NetEvent>>,
    }

    fn connected_client() -> Fixture {
        let script = Scripted::default();
        let (pipeline, _) = ship_pipeline();
        let events = event_channel();
        let mut client = NetInstance::client(
            ScriptedTransport {
                script: script.clone(),
                callbacks: ClientCallbacks::default(),
                state: ClientState::Disconnected,
            },
            pipeline,
            events.clone(),
            NetConfig::default(),
        );
        let mut scene = SceneManager::new();
        client.connect("server", 1).unwrap();
        client.update(&mut scene, FRAME);
        assert_eq!(events.drain(), vec![NetEvent::JoinServer]);
        Fixture {
            client,
            script,
            scene,
            events,
        }
    }

    fn hull_payload(points: u32) -> Vec<u8> {
        crate::stream::to_bytes(&points)
    }

    fn create(remote: u32, role: NetRole, points: u32) -> NetMessage {
        NetMessage::CreateEntity {
            entity_id: RemoteId(remote),
            entity_type: ship_type(),
            role,
            payload: hull_payload(points),
        }
    }

    fn counting_spawn(f: &mut Fixture) -> (SpawnRequestId, Arc<Mutex<Vec<EntityId>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let request = f
            .client
            .spawn_entity(ship_type(), true, move |e| sink.lock().push(e.id()))
            .unwrap();
        (request, seen)
    }

    #[test]
    fn test_spawn_request_on_wire() {
        let mut f = connected_client();
        let (request, _) = counting_spawn(&mut f);
        assert_eq!(request, SpawnRequestId(1));
        assert_eq!(
            f.script.sent(),
            vec![NetMessage::SpawnRequest {
                request_id: request,
                entity_type: ship_type(),
                authoritative_proxy: true,
            }]
        );
        assert_eq!(f.client.pending_spawns(), 1);
    }

    #[test]
    fn test_create_then_response_completes_once() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        f.script.push(&create(40, NetRole::AuthoritativeProxy, 7));
        f.client.update(&mut f.scene, FRAME);
        assert!(seen.lock().is_empty());

        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(40),
        });
        f.client.update(&mut f.scene, FRAME);

        let local = f.client.local_entity(RemoteId(40)).unwrap();
        assert_eq!(*seen.lock(), vec![local]);
        assert_eq!(f.client.pending_spawns(), 0);

        // A repeated response does not fire again.
        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(40),
        });
        f.client.update(&mut f.scene, FRAME);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_response_then_create_completes_once() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(41),
        });
        f.client.update(&mut f.scene, FRAME);
        assert!(seen.lock().is_empty());
        assert_eq!(f.client.pending_spawns(), 1);

        f.script.push(&create(41, NetRole::AuthoritativeProxy, 7));
        f.client.update(&mut f.scene, FRAME);

        let local = f.client.local_entity(RemoteId(41)).unwrap();
        assert_eq!(*seen.lock(), vec![local]);
        assert_eq!(f.client.pending_spawns(), 0);

        let entity = f.scene.find_entity(local).unwrap();
        assert_eq!(entity.component::<Hull>().unwrap().points, 7);
        let data = entity.component::<CNetData>().unwrap();
        assert_eq!(data.role(), NetRole::AuthoritativeProxy);
        assert_eq!(data.remote_role(), NetRole::Authority);
    }

    #[test]
    fn test_null_response_fails_spawn() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId::NULL,
        });
        f.client.update(&mut f.scene, FRAME);

        assert!(seen.lock().is_empty());
        assert_eq!(f.client.pending_spawns(), 0);
        assert_eq!(f.events.drain(), vec![NetEvent::SpawnFailed { request_id: request }]);
    }

    #[test]
    fn test_unmirrorable_create_then_response_fails_spawn() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        // Empty payload: the mirror cannot be initialised.
        f.script.push(&NetMessage::CreateEntity {
            entity_id: RemoteId(40),
            entity_type: ship_type(),
            role: NetRole::AuthoritativeProxy,
            payload: Vec::new(),
        });
        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(40),
        });
        f.client.update(&mut f.scene, FRAME);

        assert!(seen.lock().is_empty());
        assert_eq!(f.client.pending_spawns(), 0);
        assert!(f.scene.is_empty());
        assert_eq!(f.events.drain(), vec![NetEvent::SpawnFailed { request_id: request }]);
    }

    #[test]
    fn test_destroy_between_create_and_response_fails_spawn() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        f.script.push(&create(40, NetRole::AuthoritativeProxy, 7));
        f.script.push(&NetMessage::DestroyEntity {
            entity_id: RemoteId(40),
        });
        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(40),
        });
        f.client.update(&mut f.scene, FRAME);

        assert!(seen.lock().is_empty());
        assert_eq!(f.client.pending_spawns(), 0);
        assert!(f.scene.is_empty());
        assert_eq!(f.events.drain(), vec![NetEvent::SpawnFailed { request_id: request }]);
    }

    #[test]
    fn test_response_then_unmirrorable_create_fails_spawn() {
        let mut f = connected_client();
        let (request, seen) = counting_spawn(&mut f);

        f.script.push(&NetMessage::SpawnResponse {
            request_id: request,
            entity_id: RemoteId(40),
        });
        f.script.push(&NetMessage::CreateEntity {
            entity_id: RemoteId(40),
            entity_type: ship_type(),
            role: NetRole::AuthoritativeProxy,
            payload: Vec::new(),
        });
        f.client.update(&mut f.scene, FRAME);

        assert!(seen.lock().is_empty());
        assert_eq!(f.client.pending_spawns(), 0);
        assert_eq!(f.events.drain(), vec![NetEvent::SpawnFailed { request_id: request }]);
    }

    #[test]
    fn test_unmapped_property_update_is_dropped() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::Proxy, 10));
        f.client.update(&mut f.scene, FRAME);
        let local = f.client.local_entity(RemoteId(5)).unwrap();

        f.script.push(&NetMessage::PropertyUpdate {
            entity_id: RemoteId(6),
            payload: hull_payload(99),
        });
        f.client.update(&mut f.scene, FRAME);

        assert_eq!(f.scene.len(), 1);
        let hull = f.scene.find_entity(local).unwrap().component::<Hull>().unwrap();
        assert_eq!(hull.points, 10);
    }

    #[test]
    fn test_property_update_applies() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::Proxy, 10));
        f.script.push(&NetMessage::PropertyUpdate {
            entity_id: RemoteId(5),
            payload: hull_payload(3),
        });
        f.client.update(&mut f.scene, FRAME);

        let local = f.client.local_entity(RemoteId(5)).unwrap();
        let hull = f.scene.find_entity(local).unwrap().component::<Hull>().unwrap();
        assert_eq!(hull.points, 3);
    }

    #[test]
    fn test_unknown_type_is_not_mirrored() {
        let mut f = connected_client();
        f.script.push(&NetMessage::CreateEntity {
            entity_id: RemoteId(8),
            entity_type: EntityType::named("Asteroid"),
            role: NetRole::Proxy,
            payload: Vec::new(),
        });
        f.client.update(&mut f.scene, FRAME);
        assert!(f.scene.is_empty());
        assert_eq!(f.client.local_entity(RemoteId(8)), None);
    }

    #[test]
    fn test_duplicate_create_is_dropped() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::Proxy, 10));
        f.script.push(&create(5, NetRole::Proxy, 20));
        f.client.update(&mut f.scene, FRAME);
        assert_eq!(f.scene.len(), 1);
    }

    #[test]
    fn test_destroy_and_set_role() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::Proxy, 10));
        f.client.update(&mut f.scene, FRAME);
        let local = f.client.local_entity(RemoteId(5)).unwrap();

        f.script.push(&NetMessage::SetRole {
            entity_id: RemoteId(5),
            role: NetRole::AuthoritativeProxy,
        });
        f.client.update(&mut f.scene, FRAME);
        let role = f
            .scene
            .find_entity(local)
            .and_then(|e| e.component::<CNetData>())
            .map(CNetData::role);
        assert_eq!(role, Some(NetRole::AuthoritativeProxy));

        f.script.push(&NetMessage::DestroyEntity {
            entity_id: RemoteId(5),
        });
        f.client.update(&mut f.scene, FRAME);
        assert!(f.scene.find_entity(local).is_none());
        assert_eq!(f.client.remote_entity(local), None);
    }

    #[test]
    fn test_client_rpc_runs_on_mirror() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::AuthoritativeProxy, 10));
        f.script.push(&NetMessage::Rpc {
            entity_id: RemoteId(5),
            rpc_id: RpcId(1),
            payload: Vec::new(),
        });
        // Server rpcs are never executed on a client.
        f.script.push(&NetMessage::Rpc {
            entity_id: RemoteId(5),
            rpc_id: RpcId(0),
            payload: hull_payload(50),
        });
        f.client.update(&mut f.scene, FRAME);

        let local = f.client.local_entity(RemoteId(5)).unwrap();
        let hull = f.scene.find_entity(local).unwrap().component::<Hull>().unwrap();
        assert_eq!(hull.alarms, 1);
        assert_eq!(hull.points, 10);
    }

    #[test]
    fn test_server_rpc_is_sent_with_remote_id() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::AuthoritativeProxy, 10));
        f.client.update(&mut f.scene, FRAME);
        let local = f.client.local_entity(RemoteId(5)).unwrap();

        f.client.send_rpc(&mut f.scene, local, REPAIR, &25).unwrap();
        f.client.update(&mut f.scene, FRAME);

        assert_eq!(
            f.script.sent(),
            vec![NetMessage::Rpc {
                entity_id: RemoteId(5),
                rpc_id: RpcId(0),
                payload: hull_payload(25),
            }]
        );
    }

    #[test]
    fn test_disconnect_tears_down() {
        let mut f = connected_client();
        f.script.push(&create(5, NetRole::Proxy, 10));
        f.client.update(&mut f.scene, FRAME);
        let (request, seen) = counting_spawn(&mut f);

        f.client.disconnect(&mut f.scene).unwrap();

        assert!(f.scene.is_empty());
        assert_eq!(f.client.local_entity(RemoteId(5)), None);
        assert_eq!(f.client.pending_spawns(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(
            f.events.drain(),
            vec![
                NetEvent::SpawnFailed { request_id: request },
                NetEvent::LeftServer
            ]
        );
    }
}
