//! Fixtures shared by the net instance unit tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use replica_core::{Component, EventChannel};

use super::{EntityTypeRegistry, NetEvent, SharedPipeline};
use crate::layout::{RepLayout, Replicated, Rpc, RpcKey};
use crate::rep_field;
use crate::types::EntityType;

pub const FRAME: Duration = Duration::from_millis(16);

#[derive(Debug, Default, PartialEq)]
pub struct Hull {
    pub points: u32,
    pub alarms: u32,
}

impl Component for Hull {}

impl Hull {
    fn repair(&mut self, amount: u32) {
        self.points += amount;
    }

    fn alarm(&mut self, _: ()) {
        self.alarms += 1;
    }
}

impl Replicated for Hull {
    fn rep_layout() -> RepLayout {
        RepLayout::new()
            .with_property(rep_field!(Hull, points: u32).into_binding())
            .with_rpc(Rpc::server("repair", Hull::repair).into_binding())
            .with_rpc(Rpc::client("alarm", Hull::alarm).into_binding())
    }
}

pub const REPAIR: RpcKey<Hull, u32> = RpcKey::new("repair");
pub const ALARM: RpcKey<Hull, ()> = RpcKey::new("alarm");

pub fn ship_type() -> EntityType {
    EntityType::named("Ship")
}

pub fn event_channel() -> Arc<EventChannel<NetEvent>> {
    Arc::new(EventChannel::unbounded())
}

/// A pipeline that knows "Ship", plus a typed handle to it.
pub fn ship_pipeline() -> (SharedPipeline, Arc<Mutex<EntityTypeRegistry>>) {
    let mut types = EntityTypeRegistry::new();
    types.register_replicated::<(Hull,)>("Ship", |e| {
        e.add_component(Hull {
            points: 100,
            alarms: 0,
        });
    });
    let registry = Arc::new(Mutex::new(types));
    let shared: SharedPipeline = registry.clone();
    (shared, registry)
}

/// A pipeline that knows nothing.
pub fn empty_pipeline() -> SharedPipeline {
    Arc::new(Mutex::new(EntityTypeRegistry::new()))
}
