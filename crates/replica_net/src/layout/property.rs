//! # Property Bindings
//!
//! A property binding reads or writes one typed value of one component, given
//! only the entity. The replication core sees them as `dyn PropertyBinding`
//! and never learns the component's concrete type.
//!
//! Three binding styles, all streamed through the same [`Streamable`] impl:
//!
//! - **field**: a struct field, usually built with [`rep_field!`](crate::rep_field)
//! - **reference**: a `&T` / `&mut T` accessor pair
//! - **getter/setter**: by-value accessor pair

use std::any::{type_name, TypeId};
use std::sync::Arc;

use replica_core::{Component, Entity};

use crate::error::{NetError, NetResult};
use crate::stream::{self, Reader, Streamable, Writer};

/// Type-erased property accessor.
pub trait PropertyBinding: Send + Sync {
    /// Property name, for diagnostics.
    fn name(&self) -> &'static str;

    /// How the property is accessed.
    fn style(&self) -> BindingStyle;

    /// `TypeId` of the owning component.
    fn component_type(&self) -> TypeId;

    /// Type name of the owning component.
    fn component_name(&self) -> &'static str;

    /// Writes the current value.
    ///
    /// # Errors
    ///
    /// Fails if the entity lacks the owning component.
    fn serialise(&self, entity: &Entity, out: &mut Writer) -> NetResult<()>;

    /// Reads a value and stores it into the component.
    ///
    /// # Errors
    ///
    /// Fails if the entity lacks the owning component or the stream is invalid.
    fn deserialise(&self, entity: &mut Entity, input: &mut Reader<'_>) -> NetResult<()>;

    /// Reads and discards a value.
    ///
    /// # Errors
    ///
    /// Fails if the stream is short or invalid.
    fn skip(&self, input: &mut Reader<'_>) -> NetResult<()>;
}

/// Binding style of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingStyle {
    /// Struct field.
    Field,
    /// Reference accessor pair.
    Reference,
    /// By-value getter and setter.
    GetterSetter,
}

enum Access<C, T> {
    Reference {
        get: fn(&C) -> &T,
        get_mut: fn(&mut C) -> &mut T,
    },
    Value {
        get: fn(&C) -> T,
        set: fn(&mut C, T),
    },
}

/// Typed property binding of component `C` holding a `T`.
pub struct RepProperty<C, T> {
    name: &'static str,
    style: BindingStyle,
    access: Access<C, T>,
}

impl<C: Component, T: Streamable + 'static> RepProperty<C, T> {
    /// Binds a struct field through its projection functions.
    ///
    /// Prefer [`rep_field!`](crate::rep_field), which writes the projections.
    #[must_use]
    pub fn field(name: &'static str, get: fn(&C) -> &T, get_mut: fn(&mut C) -> &mut T) -> Self {
        Self {
            name,
            style: BindingStyle::Field,
            access: Access::Reference { get, get_mut },
        }
    }

    /// Binds a reference accessor pair, e.g. `Ship::hull` / `Ship::hull_mut`.
    #[must_use]
    pub fn reference(
        name: &'static str,
        get: fn(&C) -> &T,
        get_mut: fn(&mut C) -> &mut T,
    ) -> Self {
        Self {
            name,
            style: BindingStyle::Reference,
            access: Access::Reference { get, get_mut },
        }
    }

    /// Binds a by-value getter and setter, e.g. `Ship::speed` / `Ship::set_speed`.
    #[must_use]
    pub fn getter_setter(name: &'static str, get: fn(&C) -> T, set: fn(&mut C, T)) -> Self {
        Self {
            name,
            style: BindingStyle::GetterSetter,
            access: Access::Value { get, set },
        }
    }

    /// Erases the binding for storage in a layout.
    #[must_use]
    pub fn into_binding(self) -> Arc<dyn PropertyBinding> {
        Arc::new(self)
    }

    fn missing(entity: &Entity) -> NetError {
        NetError::MissingComponent {
            entity: entity.id(),
            component: type_name::<C>(),
        }
    }
}

impl<C: Component, T: Streamable + 'static> PropertyBinding for RepProperty<C, T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn style(&self) -> BindingStyle {
        self.style
    }

    fn component_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn component_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn serialise(&self, entity: &Entity, out: &mut Writer) -> NetResult<()> {
        let component = entity.component::<C>().ok_or_else(|| Self::missing(entity))?;
        match &self.access {
            Access::Reference { get, .. } => stream::write(out, get(component)),
            Access::Value { get, .. } => stream::write(out, &get(component)),
        }
        Ok(())
    }

    fn deserialise(&self, entity: &mut Entity, input: &mut Reader<'_>) -> NetResult<()> {
        let value = stream::read::<T>(input)?;
        let missing = Self::missing(entity);
        let component = entity.component_mut::<C>().ok_or(missing)?;
        match &self.access {
            Access::Reference { get_mut, .. } => *get_mut(component) = value,
            Access::Value { set, .. } => set(component, value),
        }
        Ok(())
    }

    fn skip(&self, input: &mut Reader<'_>) -> NetResult<()> {
        stream::read::<T>(input)?;
        Ok(())
    }
}

/// Builds a field binding from a component type and a typed field name.
///
/// ```rust
/// use replica_core::Component;
/// use replica_net::rep_field;
///
/// struct Hull { points: u32 }
/// impl Component for Hull {}
///
/// let binding = rep_field!(Hull, points: u32).into_binding();
/// assert_eq!(binding.name(), "points");
/// ```
#[macro_export]
macro_rules! rep_field {
    ($component:ty, $field:ident : $ty:ty) => {{
        fn get(component: &$component) -> &$ty {
            &component.$field
        }
        fn get_mut(component: &mut $component) -> &mut $ty {
            &mut component.$field
        }
        $crate::layout::RepProperty::<$component, $ty>::field(stringify!($field), get, get_mut)
    }};
}
