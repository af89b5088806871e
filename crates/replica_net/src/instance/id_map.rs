//! Bidirectional map between server entity ids and local entity ids.

use std::collections::HashMap;

use replica_core::EntityId;

use crate::types::RemoteId;

/// Remote <-> local entity id map.
///
/// Both directions change together; an id can be mapped at most once on
/// either side.
#[derive(Debug, Default)]
pub struct EntityIdMap {
    remote_to_local: HashMap<RemoteId, EntityId>,
    local_to_remote: HashMap<EntityId, RemoteId>,
}

impl EntityIdMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `remote` to `local`.
    ///
    /// Returns false and leaves the map unchanged if either id is already mapped.
    pub fn insert(&mut self, remote: RemoteId, local: EntityId) -> bool {
        if self.remote_to_local.contains_key(&remote) || self.local_to_remote.contains_key(&local) {
            return false;
        }
        self.remote_to_local.insert(remote, local);
        self.local_to_remote.insert(local, remote);
        true
    }

    /// Local id mapped to `remote`.
    #[must_use]
    pub fn local(&self, remote: RemoteId) -> Option<EntityId> {
        self.remote_to_local.get(&remote).copied()
    }

    /// Remote id mapped to `local`.
    #[must_use]
    pub fn remote(&self, local: EntityId) -> Option<RemoteId> {
        self.local_to_remote.get(&local).copied()
    }

    /// Removes the pair containing `remote`.
    pub fn remove_remote(&mut self, remote: RemoteId) -> Option<EntityId> {
        let local = self.remote_to_local.remove(&remote)?;
        self.local_to_remote.remove(&local);
        Some(local)
    }

    /// Removes the pair containing `local`.
    pub fn remove_local(&mut self, local: EntityId) -> Option<RemoteId> {
        let remote = self.local_to_remote.remove(&local)?;
        self.remote_to_local.remove(&remote);
        Some(remote)
    }

    /// Removes every pair, returning the local ids.
    pub fn clear(&mut self) -> Vec<EntityId> {
        self.remote_to_local.clear();
        self.local_to_remote.drain().map(|(local, _)| local).collect()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }

    /// Returns true if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }

    /// All `(remote, local)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (RemoteId, EntityId)> + '_ {
        self.remote_to_local.iter().map(|(r, l)| (*r, *l))
    }
}
