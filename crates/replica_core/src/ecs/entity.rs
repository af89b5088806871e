//! # Entity Management
//!
//! Entities are an id plus the components attached to them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for an entity.
///
/// `0` is the null id. Network messages use it to signal "no entity".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(0);

    /// Creates an entity ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker trait for components that can be attached to an [`Entity`].
///
/// # Example
///
/// ```rust
/// use replica_core::Component;
///
/// struct Health(u32);
/// impl Component for Health {}
/// ```
pub trait Component: Any + Send + Sync {}

/// A component slot: the boxed value plus its type name for diagnostics.
struct ComponentSlot {
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// An entity and its components.
pub struct Entity {
    id: EntityId,
    components: HashMap<TypeId, ComponentSlot>,
}

impl Entity {
    /// Creates an entity with no components.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: HashMap::new(),
        }
    }

    /// Returns this entity's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Attaches a component, replacing any existing component of the same type.
    ///
    /// Returns a mutable reference to the attached component.
    pub fn add_component<T: Component>(&mut self, component: T) -> &mut T {
        let slot = ComponentSlot {
            name: std::any::type_name::<T>(),
            value: Box::new(component),
        };
        let slot = match self.components.entry(TypeId::of::<T>()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                tracing::debug!("entity {} replaced component {}", self.id, slot.name);
                entry.insert(slot);
                entry.into_mut()
            }
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(slot),
        };
        slot.value
            .downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("component slot keyed by its own TypeId"))
    }

    /// Removes a component, returning it if it was attached.
    pub fn remove_component<T: Component>(&mut self) -> Option<T> {
        let slot = self.components.remove(&TypeId::of::<T>())?;
        slot.value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Returns a component by type.
    #[must_use]
    pub fn component<T: Component>(&self) -> Option<&T> {
        self.components
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_ref::<T>())
    }

    /// Returns a mutable component by type.
    pub fn component_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components
            .get_mut(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_mut::<T>())
    }

    /// Checks if a component of type `T` is attached.
    #[inline]
    #[must_use]
    pub fn has_component<T: Component>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }

    /// Checks if a component with the given `TypeId` is attached.
    #[inline]
    #[must_use]
    pub fn has_component_type(&self, type_id: TypeId) -> bool {
        self.components.contains_key(&type_id)
    }

    /// Returns the number of attached components.
    #[inline]
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Iterates over the type names of attached components.
    pub fn component_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.values().map(|slot| slot.name)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("components", &self.component_names().collect::<Vec<_>>())
            .finish()
    }
}
