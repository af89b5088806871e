//! # Networked Entity Component
//!
//! [`CNetData`] marks an entity as replicated. It holds the entity's layout,
//! its local and remote roles, and a [`NetHandle`] back to the net instance.
//!
//! ## Design
//!
//! The component lives inside the entity it describes, so every operation is
//! an associated function taking the entity. The layout is `Arc`-shared and
//! cloned out before the entity is mutated.
//!
//! RPCs that must cross the wire are pushed into the handle's outbox, which
//! the net instance drains on its next update. RPCs whose target is this
//! process run synchronously instead:
//!
//! - a server-direction RPC invoked on the server
//! - a client-direction RPC invoked on the client that owns the entity

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use replica_core::{Component, Entity, EntityId};
use tracing::{trace, warn};

use crate::error::{NetError, NetResult};
use crate::layout::{RepLayout, RpcKey};
use crate::stream::{Reader, Streamable, Writer};
use crate::types::{NetRole, RpcDirection, RpcId};

/// Which side a net instance plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetMode {
    /// Authoritative server.
    Server,
    /// Client of a server.
    Client,
}

/// An RPC waiting to be sent by the net instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRpc {
    /// Local id of the target entity.
    pub entity: EntityId,
    /// RPC id within the entity's layout.
    pub rpc: RpcId,
    /// Declared direction of the RPC.
    pub direction: RpcDirection,
    /// Encoded arguments.
    pub payload: Vec<u8>,
}

/// Connection from a [`CNetData`] to the net instance that replicates it.
#[derive(Clone, Debug)]
pub struct NetHandle {
    mode: NetMode,
    outbox: Sender<OutgoingRpc>,
}

impl NetHandle {
    /// Creates a handle and the receiving end of its RPC outbox.
    #[must_use]
    pub fn channel(mode: NetMode) -> (Self, Receiver<OutgoingRpc>) {
        let (outbox, rx) = crossbeam_channel::unbounded();
        (Self { mode, outbox }, rx)
    }

    /// Mode of the owning instance.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> NetMode {
        self.mode
    }

    /// Returns true if the owning instance is a server.
    #[inline]
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.mode == NetMode::Server
    }

    fn submit(&self, rpc: OutgoingRpc) -> NetResult<()> {
        self.outbox.send(rpc).map_err(|_| NetError::InstanceGone)
    }
}

/// Replication state of one entity.
#[derive(Debug)]
pub struct CNetData {
    layout: Arc<RepLayout>,
    role: NetRole,
    remote_role: NetRole,
    net: NetHandle,
    bound: bool,
}

impl Component for CNetData {}

impl CNetData {
    /// Creates unbound net data. Add it to the entity, then call [`CNetData::bind`].
    #[must_use]
    pub fn new(net: NetHandle, layout: Arc<RepLayout>, role: NetRole) -> Self {
        Self {
            layout,
            role,
            remote_role: NetRole::None,
            net,
            bound: false,
        }
    }

    /// Adds net data to `entity` and binds it.
    ///
    /// Call after every component the layout refers to has been added.
    ///
    /// # Errors
    ///
    /// Fails if the entity is already networked or lacks a bound component;
    /// the entity is left without net data in that case.
    pub fn attach(
        entity: &mut Entity,
        net: NetHandle,
        layout: Arc<RepLayout>,
        role: NetRole,
    ) -> NetResult<()> {
        if entity.has_component::<Self>() {
            return Err(NetError::NetDataExists(entity.id()));
        }
        layout.validate(entity)?;
        let data = entity.add_component(Self::new(net, layout, role));
        data.bound = true;
        Ok(())
    }

    /// Binds the layout to the entity's components. Must run exactly once.
    ///
    /// # Errors
    ///
    /// Fails if the entity has no net data, is already bound, or lacks a
    /// component the layout refers to.
    pub fn bind(entity: &mut Entity) -> NetResult<()> {
        let id = entity.id();
        let data = entity.component::<Self>().ok_or(NetError::MissingNetData(id))?;
        if data.bound {
            return Err(NetError::LayoutAlreadyBound(id));
        }
        let layout = Arc::clone(&data.layout);
        layout.validate(entity)?;
        if let Some(data) = entity.component_mut::<Self>() {
            data.bound = true;
        }
        Ok(())
    }

    /// Local role.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> NetRole {
        self.role
    }

    /// Role of the counterpart peer.
    #[inline]
    #[must_use]
    pub const fn remote_role(&self) -> NetRole {
        self.remote_role
    }

    /// Sets the local role.
    pub fn set_role(&mut self, role: NetRole) {
        self.role = role;
    }

    /// Sets the counterpart's role.
    pub fn set_remote_role(&mut self, role: NetRole) {
        self.remote_role = role;
    }

    /// The entity's layout.
    #[must_use]
    pub fn layout(&self) -> &Arc<RepLayout> {
        &self.layout
    }

    /// Handle to the owning net instance.
    #[must_use]
    pub fn net(&self) -> &NetHandle {
        &self.net
    }

    /// Returns true once [`CNetData::bind`] has succeeded.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.bound
    }

    fn bound_layout(entity: &Entity) -> NetResult<&Self> {
        let data = entity
            .component::<Self>()
            .ok_or(NetError::MissingNetData(entity.id()))?;
        if !data.bound {
            return Err(NetError::LayoutNotBound(entity.id()));
        }
        Ok(data)
    }

    /// Writes every replicated property of `entity` in layout order.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not networked, not bound, or lost a component.
    pub fn serialise(entity: &Entity, out: &mut Writer) -> NetResult<()> {
        let data = Self::bound_layout(entity)?;
        data.layout.serialise(entity, out)
    }

    /// Reads every replicated property into `entity` in layout order.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not networked, not bound, lost a component,
    /// or the input is short or invalid.
    pub fn deserialise(entity: &mut Entity, input: &mut Reader<'_>) -> NetResult<()> {
        let layout = Arc::clone(&Self::bound_layout(entity)?.layout);
        layout.deserialise(entity, input)
    }

    /// Invokes the RPC addressed by `key` with `args`.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not networked or bound, the layout has no such
    /// RPC, a local handler fails, or the net instance is gone.
    pub fn send_rpc<C: Component, A: Streamable>(
        entity: &mut Entity,
        key: RpcKey<C, A>,
        args: &A,
    ) -> NetResult<()> {
        let data = Self::bound_layout(entity)?;
        let (id, direction) = data
            .layout
            .find_rpc(key.component_type(), key.name())
            .and_then(|id| data.layout.rpc(id).map(|b| (id, b.direction())))
            .ok_or(NetError::UnknownRpcName {
                entity: entity.id(),
                component: std::any::type_name::<C>(),
                name: key.name(),
            })?;
        Self::send_rpc_id(entity, id, direction, key.encode(args))
    }

    /// Invokes an RPC by id with an already-encoded payload.
    ///
    /// Runs the handler before returning when the target is this process,
    /// otherwise queues the call for the net instance.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not networked or bound, `id` is unknown or
    /// declared with another direction, a local handler fails, or the net
    /// instance is gone.
    pub fn send_rpc_id(
        entity: &mut Entity,
        id: RpcId,
        direction: RpcDirection,
        payload: Vec<u8>,
    ) -> NetResult<()> {
        let data = Self::bound_layout(entity)?;
        let binding = data.layout.rpc(id).ok_or(NetError::UnknownRpc {
            entity: entity.id(),
            rpc: id,
        })?;
        if binding.direction() != direction {
            return Err(NetError::RpcDirectionMismatch {
                rpc: id,
                expected: binding.direction(),
                actual: direction,
            });
        }

        let local = match (data.net.mode(), direction) {
            (NetMode::Server, RpcDirection::Server) => true,
            (NetMode::Client, RpcDirection::Client) => data.role == NetRole::AuthoritativeProxy,
            _ => false,
        };

        if local {
            trace!(entity = %entity.id(), rpc = %id, "rpc short-circuited");
            let binding = Arc::clone(binding);
            return binding.receive_rpc(entity, &payload);
        }

        data.net.submit(OutgoingRpc {
            entity: entity.id(),
            rpc: id,
            direction,
            payload,
        })
    }

    /// Dispatches a received RPC to its handler.
    ///
    /// An unknown id is logged and ignored.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not networked or bound, the payload does not
    /// decode, or the handling component is missing.
    pub fn receive_rpc(entity: &mut Entity, id: RpcId, payload: &[u8]) -> NetResult<()> {
        let data = Self::bound_layout(entity)?;
        let Some(binding) = data.layout.rpc(id).map(Arc::clone) else {
            warn!(entity = %entity.id(), rpc = %id, "unknown rpc id, ignored");
            return Ok(());
        };
        binding.receive_rpc(entity, payload)
    }
}
