//! # Scene Manager
//!
//! The container for all live entities.
//!
//! Entity ids are allocated from a monotonically increasing counter and are
//! never recycled, so an id held by network state (replicated sets, remote id
//! maps) can never alias a newer entity.

use std::collections::HashMap;
use thiserror::Error;

use super::entity::{Entity, EntityId};

/// Errors raised by the scene manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// An entity with this id already exists.
    #[error("entity {0} already exists")]
    EntityExists(EntityId),

    /// The null id cannot name an entity.
    #[error("the null entity id cannot be spawned")]
    NullId,

    /// The id was never handed out by `reserve_entity_id`.
    #[error("entity id {0} was not reserved by this scene")]
    NotReserved(EntityId),
}

/// Owns every entity in the game session.
///
/// # Example
///
/// ```rust
/// use replica_core::SceneManager;
///
/// let mut scene = SceneManager::new();
/// let id = scene.reserve_entity_id();
/// scene.spawn_with_id(id).unwrap();
/// assert!(scene.find_entity(id).is_some());
/// ```
#[derive(Debug)]
pub struct SceneManager {
    /// Live entities.
    entities: HashMap<EntityId, Entity>,
    /// Next id to hand out. Starts at 1, `0` is null.
    next_id: u32,
}

impl SceneManager {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Reserves a fresh entity id without creating the entity.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit id space is exhausted.
    pub fn reserve_entity_id(&mut self) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("entity id space exhausted"));
        id
    }

    /// Creates an empty entity under a previously reserved id.
    ///
    /// # Errors
    ///
    /// Fails if the id is null, was never reserved, or is already live.
    pub fn spawn_with_id(&mut self, id: EntityId) -> Result<&mut Entity, SceneError> {
        if id.is_null() {
            return Err(SceneError::NullId);
        }
        if id.raw() >= self.next_id {
            return Err(SceneError::NotReserved(id));
        }
        match self.entities.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => Err(SceneError::EntityExists(id)),
            std::collections::hash_map::Entry::Vacant(entry) => Ok(entry.insert(Entity::new(id))),
        }
    }

    /// Reserves an id and creates an empty entity under it.
    pub fn spawn(&mut self) -> &mut Entity {
        let id = self.reserve_entity_id();
        self.entities.entry(id).or_insert_with(|| Entity::new(id))
    }

    /// Finds a live entity.
    #[must_use]
    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Finds a live entity for mutation.
    pub fn find_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Removes an entity and all its components.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            tracing::trace!("despawned entity {}", id);
        }
        removed
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the scene has no live entities.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates over the ids of all live entities, in no particular order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }
}

impl Default for SceneManager {
    fn default() -> Self {
        Self::new()
    }
}
