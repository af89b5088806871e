//! # Replication Layout
//!
//! A [`RepLayout`] is the wire schema of one networked entity: an ordered list
//! of property bindings plus a map of RPC bindings keyed by dense [`RpcId`]s.
//!
//! ## Design
//!
//! - Property order is the wire order. There are no field tags, so both
//!   peers must build layouts from the same ordered component list.
//! - Each component type declares its own part via [`Replicated`];
//!   [`RepLayout::build`] concatenates parts and renumbers RPC ids as it goes.
//! - Bindings are `Arc`-shared so cloning and concatenating layouts is cheap.

mod property;
mod rpc;

pub use property::{BindingStyle, PropertyBinding, RepProperty};
pub use rpc::{Rpc, RpcBinding, RpcKey};

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use replica_core::{Component, Entity};

use crate::error::{NetError, NetResult};
use crate::stream::{Reader, Writer};
use crate::types::RpcId;

/// A component type that contributes to replication layouts.
pub trait Replicated: Component {
    /// This component's properties and RPCs, with RPC ids starting at 0.
    fn rep_layout() -> RepLayout;
}

/// An ordered list of [`Replicated`] component types, written as a tuple.
pub trait ComponentList {
    /// Concatenation of every member's layout, in tuple order.
    fn rep_layout() -> RepLayout;
}

macro_rules! impl_component_list {
    ($($name:ident),+) => {
        impl<$($name: Replicated),+> ComponentList for ($($name,)+) {
            fn rep_layout() -> RepLayout {
                let mut layout = RepLayout::new();
                $(layout += $name::rep_layout();)+
                layout
            }
        }
    };
}

impl_component_list!(A);
impl_component_list!(A, B);
impl_component_list!(A, B, C);
impl_component_list!(A, B, C, D);
impl_component_list!(A, B, C, D, E);
impl_component_list!(A, B, C, D, E, F);
impl_component_list!(A, B, C, D, E, F, G);
impl_component_list!(A, B, C, D, E, F, G, H);

/// Property and RPC schema of one networked entity.
#[derive(Clone, Default)]
pub struct RepLayout {
    properties: Vec<Arc<dyn PropertyBinding>>,
    rpcs: BTreeMap<RpcId, Arc<dyn RpcBinding>>,
    next_rpc_id: u32,
}

impl RepLayout {
    /// Creates an empty layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the layout of an entity made of the given components.
    ///
    /// ```rust,ignore
    /// let layout = RepLayout::build::<(Ship, Turret)>();
    /// ```
    #[must_use]
    pub fn build<L: ComponentList>() -> Self {
        L::rep_layout()
    }

    /// Appends a property binding (builder form).
    #[must_use]
    pub fn with_property(mut self, binding: Arc<dyn PropertyBinding>) -> Self {
        self.push_property(binding);
        self
    }

    /// Appends an RPC binding (builder form).
    ///
    /// # Panics
    ///
    /// Panics if the layout already holds 65536 RPCs.
    #[must_use]
    pub fn with_rpc(mut self, binding: Arc<dyn RpcBinding>) -> Self {
        if let Err(e) = self.push_rpc(binding) {
            panic!("{e}");
        }
        self
    }

    /// Appends a property binding.
    pub fn push_property(&mut self, binding: Arc<dyn PropertyBinding>) {
        self.properties.push(binding);
    }

    /// Appends an RPC binding under the next free id.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::RpcIdSpaceExhausted`] past 65536 RPCs.
    pub fn push_rpc(&mut self, binding: Arc<dyn RpcBinding>) -> NetResult<RpcId> {
        let raw = u16::try_from(self.next_rpc_id).map_err(|_| NetError::RpcIdSpaceExhausted)?;
        let id = RpcId(raw);
        self.rpcs.insert(id, binding);
        self.next_rpc_id += 1;
        Ok(id)
    }

    /// Appends `other`'s properties, and its RPCs renumbered after this
    /// layout's, preserving their relative order.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::RpcIdSpaceExhausted`] past 65536 RPCs. The layout
    /// is left unchanged in that case.
    pub fn append(&mut self, other: Self) -> NetResult<()> {
        let total = self.next_rpc_id as usize + other.rpcs.len();
        if total > usize::from(u16::MAX) + 1 {
            return Err(NetError::RpcIdSpaceExhausted);
        }
        self.properties.extend(other.properties);
        for binding in other.rpcs.into_values() {
            self.push_rpc(binding)?;
        }
        Ok(())
    }

    /// Property bindings in wire order.
    #[must_use]
    pub fn properties(&self) -> &[Arc<dyn PropertyBinding>] {
        &self.properties
    }

    /// RPC binding with the given id.
    #[must_use]
    pub fn rpc(&self, id: RpcId) -> Option<&Arc<dyn RpcBinding>> {
        self.rpcs.get(&id)
    }

    /// All RPC bindings in id order.
    pub fn rpcs(&self) -> impl Iterator<Item = (RpcId, &Arc<dyn RpcBinding>)> {
        self.rpcs.iter().map(|(id, binding)| (*id, binding))
    }

    /// Looks up an RPC by handling component and name.
    #[must_use]
    pub fn find_rpc(&self, component: TypeId, name: &str) -> Option<RpcId> {
        self.rpcs
            .iter()
            .find(|(_, b)| b.component_type() == component && b.name() == name)
            .map(|(id, _)| *id)
    }

    /// Number of properties.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Number of RPCs.
    #[must_use]
    pub fn rpc_count(&self) -> usize {
        self.rpcs.len()
    }

    /// Returns true if the layout has neither properties nor RPCs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.rpcs.is_empty()
    }

    /// Checks that `entity` carries every component a binding refers to.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::MissingComponent`] for the first absent component.
    pub fn validate(&self, entity: &Entity) -> NetResult<()> {
        let property_components = self
            .properties
            .iter()
            .map(|b| (b.component_type(), b.component_name()));
        let rpc_components = self
            .rpcs
            .values()
            .map(|b| (b.component_type(), b.component_name()));

        for (type_id, name) in property_components.chain(rpc_components) {
            if !entity.has_component_type(type_id) {
                return Err(NetError::MissingComponent {
                    entity: entity.id(),
                    component: name,
                });
            }
        }
        Ok(())
    }

    /// Writes every property of `entity` in wire order.
    ///
    /// # Errors
    ///
    /// Fails if a bound component is missing.
    pub fn serialise(&self, entity: &Entity, out: &mut Writer) -> NetResult<()> {
        for binding in &self.properties {
            binding.serialise(entity, out)?;
        }
        Ok(())
    }

    /// Reads every property into `entity` in wire order.
    ///
    /// # Errors
    ///
    /// Fails if a bound component is missing or the stream is short or invalid.
    /// Nothing is written to `entity` on failure.
    pub fn deserialise(&self, entity: &mut Entity, input: &mut Reader<'_>) -> NetResult<()> {
        for binding in &self.properties {
            if !entity.has_component_type(binding.component_type()) {
                return Err(NetError::MissingComponent {
                    entity: entity.id(),
                    component: binding.component_name(),
                });
            }
        }
        let mut dry_run = input.clone();
        for binding in &self.properties {
            binding.skip(&mut dry_run)?;
        }
        for binding in &self.properties {
            binding.deserialise(entity, input)?;
        }
        Ok(())
    }
}

impl AddAssign for RepLayout {
    /// # Panics
    ///
    /// Panics if the combined layout exceeds 65536 RPCs.
    fn add_assign(&mut self, rhs: Self) {
        if let Err(e) = self.append(rhs) {
            panic!("{e}");
        }
    }
}

impl Add for RepLayout {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl fmt::Debug for RepLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties: Vec<_> = self
            .properties
            .iter()
            .map(|b| format!("{}.{}", b.component_name(), b.name()))
            .collect();
        let rpcs: Vec<_> = self
            .rpcs
            .iter()
            .map(|(id, b)| format!("{}={}::{}", id.0, b.component_name(), b.name()))
            .collect();
        f.debug_struct("RepLayout")
            .field("properties", &properties)
            .field("rpcs", &rpcs)
            .finish()
    }
}
