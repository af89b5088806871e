//! # Entity Pipeline
//!
//! The net instance never builds entities itself. When a spawn request or a
//! `CreateEntity` message names an [`EntityType`], it hands the type to the
//! injected [`NetEntityPipeline`], which creates the entity with its
//! components and a bound [`CNetData`].
//!
//! [`EntityTypeRegistry`] is a ready-made pipeline: a table from type tags to
//! a layout and a component builder.

use std::collections::HashMap;
use std::sync::Arc;

use replica_core::{Entity, EntityId, SceneManager};
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};
use crate::layout::{ComponentList, RepLayout};
use crate::net_data::{CNetData, NetHandle};
use crate::types::{EntityType, NetRole};

/// Builds networked entities by type.
pub trait NetEntityPipeline: Send {
    /// Creates an entity of `entity_type` under the reserved id `id`.
    ///
    /// The entity must carry a bound [`CNetData`] using `net` and `role`, with
    /// the same layout every peer builds for this type. Returns `None` for an
    /// unknown type or when construction fails; the scene must not keep a
    /// half-built entity in that case.
    fn create_entity_from_type<'s>(
        &mut self,
        scene: &'s mut SceneManager,
        id: EntityId,
        entity_type: EntityType,
        role: NetRole,
        net: &NetHandle,
    ) -> Option<&'s mut Entity>;
}

/// Adds the components of one entity type to a fresh entity.
pub type BuildFn = Box<dyn Fn(&mut Entity) + Send>;

struct EntityTemplate {
    name: String,
    layout: Arc<RepLayout>,
    build: BuildFn,
}

/// Table of entity types, usable as a [`NetEntityPipeline`].
///
/// # Example
///
/// ```rust
/// use replica_net::instance::EntityTypeRegistry;
/// use replica_net::layout::{RepLayout, Replicated};
/// use replica_net::rep_field;
/// use replica_core::Component;
///
/// #[derive(Default)]
/// struct Hull { points: u32 }
/// impl Component for Hull {}
/// impl Replicated for Hull {
///     fn rep_layout() -> RepLayout {
///         RepLayout::new().with_property(rep_field!(Hull, points: u32).into_binding())
///     }
/// }
///
/// let mut types = EntityTypeRegistry::new();
/// let ship = types.register_replicated::<(Hull,)>("Ship", |e| {
///     e.add_component(Hull::default());
/// });
/// assert_eq!(types.name(ship), Some("Ship"));
/// ```
#[derive(Default)]
pub struct EntityTypeRegistry {
    templates: HashMap<EntityType, EntityTemplate>,
}

impl EntityTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with an explicit layout. Returns its type tag.
    ///
    /// Registering a name twice replaces the earlier entry.
    pub fn register(
        &mut self,
        name: &str,
        layout: RepLayout,
        build: impl Fn(&mut Entity) + Send + 'static,
    ) -> EntityType {
        let entity_type = EntityType::named(name);
        let template = EntityTemplate {
            name: name.to_owned(),
            layout: Arc::new(layout),
            build: Box::new(build),
        };
        if let Some(old) = self.templates.insert(entity_type, template) {
            if old.name == name {
                debug!(name, "entity type re-registered");
            } else {
                warn!(name, previous = %old.name, %entity_type, "entity type hash collision, replacing");
            }
        }
        entity_type
    }

    /// Registers `name` with the layout of the component list `L`.
    pub fn register_replicated<L: ComponentList>(
        &mut self,
        name: &str,
        build: impl Fn(&mut Entity) + Send + 'static,
    ) -> EntityType {
        self.register(name, RepLayout::build::<L>(), build)
    }

    /// Layout registered for `entity_type`.
    #[must_use]
    pub fn layout(&self, entity_type: EntityType) -> Option<&Arc<RepLayout>> {
        self.templates.get(&entity_type).map(|t| &t.layout)
    }

    /// Name registered for `entity_type`.
    #[must_use]
    pub fn name(&self, entity_type: EntityType) -> Option<&str> {
        self.templates.get(&entity_type).map(|t| t.name.as_str())
    }

    /// Returns true if `entity_type` is registered.
    #[must_use]
    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.templates.contains_key(&entity_type)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Builds an entity of `entity_type` under the reserved id `id`.
    ///
    /// # Errors
    ///
    /// Fails if the type is unknown, the id cannot be spawned, or the built
    /// entity lacks a component its layout refers to. Nothing is left in
    /// the scene on failure.
    pub fn spawn<'s>(
        &self,
        scene: &'s mut SceneManager,
        id: EntityId,
        entity_type: EntityType,
        role: NetRole,
        net: &NetHandle,
    ) -> NetResult<&'s mut Entity> {
        let template = self
            .templates
            .get(&entity_type)
            .ok_or(NetError::UnknownEntityType(entity_type))?;

        let attached = {
            let entity = scene.spawn_with_id(id)?;
            (template.build)(entity);
            CNetData::attach(entity, net.clone(), Arc::clone(&template.layout), role)
        };
        if let Err(error) = attached {
            scene.despawn(id);
            return Err(error);
        }
        scene.find_entity_mut(id).ok_or(NetError::EntityNotFound(id))
    }
}

impl NetEntityPipeline for EntityTypeRegistry {
    fn create_entity_from_type<'s>(
        &mut self,
        scene: &'s mut SceneManager,
        id: EntityId,
        entity_type: EntityType,
        role: NetRole,
        net: &NetHandle,
    ) -> Option<&'s mut Entity> {
        match self.spawn(scene, id, entity_type, role, net) {
            Ok(entity) => Some(entity),
            Err(error) => {
                warn!(entity = %id, %entity_type, %error, "entity pipeline could not build entity");
                None
            }
        }
    }
}
