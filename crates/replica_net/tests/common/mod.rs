//! Shared fixtures for the replication integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use replica_core::{Component, Entity, EntityId, EventChannel, SceneManager};
use replica_net::instance::{
    EntityTypeRegistry, NetEntityPipeline, NetEvent, NetInstance, SharedPipeline,
};
use replica_net::layout::{RepLayout, Replicated, Rpc, RpcKey};
use replica_net::rep_field;
use replica_net::transport::in_process::{InProcessClient, InProcessRegistry, InProcessServer};
use replica_net::{EntityType, NetConfig, NetRole};

pub const FRAME: Duration = Duration::from_millis(16);
pub const PORT: u16 = 9000;

#[derive(Debug, Default, PartialEq)]
pub struct Hull {
    pub points: u32,
    pub armour: f32,
    pub alarms: u32,
}

impl Component for Hull {}

impl Hull {
    fn repair(&mut self, amount: u32) {
        self.points += amount;
    }

    fn alarm(&mut self, level: u8) {
        self.alarms += u32::from(level);
    }
}

impl Replicated for Hull {
    fn rep_layout() -> RepLayout {
        RepLayout::new()
            .with_property(rep_field!(Hull, points: u32).into_binding())
            .with_property(rep_field!(Hull, armour: f32).into_binding())
            .with_rpc(Rpc::server("repair", Hull::repair).into_binding())
            .with_rpc(Rpc::client("alarm", Hull::alarm).into_binding())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Pilot {
    pub callsign: String,
}

impl Component for Pilot {}

impl Pilot {
    fn rename(&mut self, callsign: String) {
        self.callsign = callsign;
    }
}

impl Replicated for Pilot {
    fn rep_layout() -> RepLayout {
        RepLayout::new()
            .with_property(rep_field!(Pilot, callsign: String).into_binding())
            .with_rpc(Rpc::server("rename", Pilot::rename).into_binding())
    }
}

pub const REPAIR: RpcKey<Hull, u32> = RpcKey::new("repair");
pub const ALARM: RpcKey<Hull, u8> = RpcKey::new("alarm");
pub const RENAME: RpcKey<Pilot, String> = RpcKey::new("rename");

pub fn ship_type() -> EntityType {
    EntityType::named("Ship")
}

pub fn build_ship(entity: &mut Entity) {
    entity.add_component(Hull {
        points: 100,
        armour: 0.5,
        alarms: 0,
    });
    entity.add_component(Pilot {
        callsign: "rookie".to_owned(),
    });
}

pub fn event_channel() -> Arc<EventChannel<NetEvent>> {
    Arc::new(EventChannel::unbounded())
}

/// A pipeline that builds "Ship" entities.
pub fn ship_registry() -> Arc<Mutex<EntityTypeRegistry>> {
    let mut types = EntityTypeRegistry::new();
    types.register_replicated::<(Hull, Pilot)>("Ship", build_ship);
    Arc::new(Mutex::new(types))
}

/// A pipeline that knows no types.
pub fn empty_registry() -> SharedPipeline {
    Arc::new(Mutex::new(EntityTypeRegistry::new()))
}

pub struct Peer {
    pub net: NetInstance,
    pub scene: SceneManager,
    pub events: Arc<EventChannel<NetEvent>>,
}

impl Peer {
    pub fn update(&mut self) {
        self.net.update(&mut self.scene, FRAME);
    }

    pub fn hull(&self, entity: EntityId) -> &Hull {
        self.scene
            .find_entity(entity)
            .and_then(|e| e.component::<Hull>())
            .expect("entity has a hull")
    }

    pub fn hull_mut(&mut self, entity: EntityId) -> &mut Hull {
        self.scene
            .find_entity_mut(entity)
            .and_then(|e| e.component_mut::<Hull>())
            .expect("entity has a hull")
    }

    pub fn pilot(&self, entity: EntityId) -> &Pilot {
        self.scene
            .find_entity(entity)
            .and_then(|e| e.component::<Pilot>())
            .expect("entity has a pilot")
    }

    pub fn net_roles(&self, entity: EntityId) -> (NetRole, NetRole) {
        let data = self
            .scene
            .find_entity(entity)
            .and_then(|e| e.component::<replica_net::CNetData>())
            .expect("entity is networked");
        (data.role(), data.remote_role())
    }
}

/// One in-process server plus any number of clients.
pub struct World {
    pub ports: InProcessRegistry,
    pub pipeline: SharedPipeline,
    pub server: Peer,
    pub clients: Vec<Peer>,
}

impl World {
    pub fn new(config: NetConfig) -> Self {
        Self::with_pipeline(config, ship_registry())
    }

    pub fn with_pipeline(config: NetConfig, pipeline: SharedPipeline) -> Self {
        let ports = InProcessRegistry::new();
        let events = event_channel();
        let mut net = NetInstance::server(
            InProcessServer::new(ports.clone()),
            Arc::clone(&pipeline),
            events.clone(),
            config,
        );
        net.listen("localhost", PORT).expect("port is free");
        Self {
            ports,
            pipeline,
            server: Peer {
                net,
                scene: SceneManager::new(),
                events,
            },
            clients: Vec::new(),
        }
    }

    /// Adds a client without connecting it.
    pub fn add_client(&mut self) -> usize {
        let events = event_channel();
        let net = NetInstance::client(
            InProcessClient::new(self.ports.clone()),
            Arc::clone(&self.pipeline),
            events.clone(),
            NetConfig::default(),
        );
        self.clients.push(Peer {
            net,
            scene: SceneManager::new(),
            events,
        });
        self.clients.len() - 1
    }

    /// Adds a client and runs frames until it is connected.
    pub fn join(&mut self) -> usize {
        let index = self.add_client();
        self.clients[index]
            .net
            .connect("localhost", PORT)
            .expect("server has room");
        self.tick();
        index
    }

    /// One frame: server first, then every client.
    pub fn tick(&mut self) {
        self.server.update();
        for client in &mut self.clients {
            client.update();
        }
    }

    /// Builds a ship on the server and replicates it.
    pub fn server_ship(&mut self, owner: Option<replica_net::ClientId>) -> EntityId {
        let id = self.server.scene.reserve_entity_id();
        let handle = self.server.net.handle().clone();
        let created = self
            .pipeline
            .lock()
            .create_entity_from_type(
                &mut self.server.scene,
                id,
                ship_type(),
                NetRole::Authority,
                &handle,
            )
            .is_some();
        assert!(created);
        self.server
            .net
            .replicate_entity(&mut self.server.scene, id, ship_type(), owner)
            .expect("ship replicates");
        id
    }

    /// Local mirror of a server entity on client `index`.
    pub fn mirror(&self, index: usize, entity: EntityId) -> Option<EntityId> {
        self.clients[index]
            .net
            .local_entity(replica_net::RemoteId::from_server_entity(entity))
    }
}
