//! # RPC Bindings
//!
//! An RPC binding couples a name, a direction and a typed handler on one
//! component. Arguments are any [`Streamable`] value, normally a tuple.
//!
//! Senders address an RPC through an [`RpcKey`], a typed `(component, name)`
//! pair; the layout turns it into the entity's [`RpcId`](crate::types::RpcId).

use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use replica_core::{Component, Entity};

use crate::error::{NetError, NetResult};
use crate::stream::{self, Streamable};
use crate::types::RpcDirection;

/// Type-erased RPC receiver.
pub trait RpcBinding: Send + Sync {
    /// RPC name, unique per component.
    fn name(&self) -> &'static str;

    /// Which side executes the RPC.
    fn direction(&self) -> RpcDirection;

    /// `TypeId` of the handling component.
    fn component_type(&self) -> TypeId;

    /// Type name of the handling component.
    fn component_name(&self) -> &'static str;

    /// Decodes the arguments and invokes the handler.
    ///
    /// # Errors
    ///
    /// Fails if the payload does not decode exactly or the component is missing.
    fn receive_rpc(&self, entity: &mut Entity, payload: &[u8]) -> NetResult<()>;
}

/// Typed RPC handler for component `C` taking arguments `A`.
pub struct Rpc<C, A> {
    name: &'static str,
    direction: RpcDirection,
    handler: fn(&mut C, A),
}

impl<C: Component, A: Streamable + 'static> Rpc<C, A> {
    /// Client-invoked RPC executed on the server.
    #[must_use]
    pub const fn server(name: &'static str, handler: fn(&mut C, A)) -> Self {
        Self {
            name,
            direction: RpcDirection::Server,
            handler,
        }
    }

    /// Server-invoked RPC executed on the owning client.
    #[must_use]
    pub const fn client(name: &'static str, handler: fn(&mut C, A)) -> Self {
        Self {
            name,
            direction: RpcDirection::Client,
            handler,
        }
    }

    /// Erases the binding for storage in a layout.
    #[must_use]
    pub fn into_binding(self) -> Arc<dyn RpcBinding> {
        Arc::new(self)
    }
}

impl<C: Component, A: Streamable + 'static> RpcBinding for Rpc<C, A> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn direction(&self) -> RpcDirection {
        self.direction
    }

    fn component_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn component_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn receive_rpc(&self, entity: &mut Entity, payload: &[u8]) -> NetResult<()> {
        let args = stream::from_bytes::<A>(payload)?;
        let id = entity.id();
        let component = entity
            .component_mut::<C>()
            .ok_or(NetError::MissingComponent {
                entity: id,
                component: type_name::<C>(),
            })?;
        (self.handler)(component, args);
        Ok(())
    }
}

/// Typed address of an RPC: the component that handles it and its name.
///
/// ```rust
/// use replica_core::Component;
/// use replica_net::layout::RpcKey;
///
/// struct Turret;
/// impl Component for Turret {}
///
/// const FIRE: RpcKey<Turret, (u32,)> = RpcKey::new("fire");
/// assert_eq!(FIRE.name(), "fire");
/// ```
pub struct RpcKey<C, A> {
    name: &'static str,
    _marker: PhantomData<fn(&mut C, A)>,
}

impl<C, A> RpcKey<C, A> {
    /// Creates a key for the RPC named `name` on component `C`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// RPC name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<C: Component, A: Streamable> RpcKey<C, A> {
    /// `TypeId` of the handling component.
    #[must_use]
    pub fn component_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    /// Encodes call arguments into an RPC payload.
    #[must_use]
    pub fn encode(&self, args: &A) -> Vec<u8> {
        stream::to_bytes(args)
    }
}

impl<C, A> Clone for RpcKey<C, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, A> Copy for RpcKey<C, A> {}

impl<C, A> fmt::Debug for RpcKey<C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RpcKey({}::{})", type_name::<C>(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::EntityId;

    #[derive(Default)]
    struct Turret {
        shots: Vec<(u32, f32)>,
    }
    impl Component for Turret {}

    impl Turret {
        fn fire(&mut self, (target, power): (u32, f32)) {
            self.shots.push((target, power));
        }
    }

    const FIRE: RpcKey<Turret, (u32, f32)> = RpcKey::new("fire");

    #[test]
    fn test_receive_invokes_handler() {
        let rpc = Rpc::server("fire", Turret::fire).into_binding();
        let mut entity = Entity::new(EntityId::new(4));
        entity.add_component(Turret::default());

        let payload = FIRE.encode(&(9, 0.5));
        rpc.receive_rpc(&mut entity, &payload).unwrap();

        assert_eq!(entity.component::<Turret>().unwrap().shots, vec![(9, 0.5)]);
        assert_eq!(rpc.direction(), RpcDirection::Server);
    }

    #[test]
    fn test_trailing_payload_rejected() {
        let rpc = Rpc::client("fire", Turret::fire);
        let mut entity = Entity::new(EntityId::new(4));
        entity.add_component(Turret::default());

        let mut payload = FIRE.encode(&(1, 1.0));
        payload.push(0xff);
        assert!(matches!(
            rpc.receive_rpc(&mut entity, &payload),
            Err(NetError::Stream(_))
        ));
        assert!(entity.component::<Turret>().unwrap().shots.is_empty());
    }

    #[test]
    fn test_missing_component() {
        let rpc = Rpc::server("fire", Turret::fire);
        let mut entity = Entity::new(EntityId::new(4));
        let err = rpc.receive_rpc(&mut entity, &FIRE.encode(&(1, 1.0))).unwrap_err();
        assert!(matches!(err, NetError::MissingComponent { .. }));
    }
}
