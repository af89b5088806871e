//! # Spawn Tracking
//!
//! A client-requested spawn completes when two server messages have both
//! arrived, in either order:
//!
//! - `CreateEntity` materializes the entity and maps its remote id
//! - `SpawnResponse` tells which remote id answers the request
//!
//! ```text
//!                 SpawnResponse(id)            CreateEntity(id)
//! WaitingForBoth ------------------> HaveSpawnResponse ----------> done
//!       |
//!       | SpawnResponse(id), id already mapped by CreateEntity
//!       +----------------------------------------------------------> done
//!       | SpawnResponse(null), or id already lost
//!       +----------------------------------------------------------> failed
//! ```
//!
//! A remote id is lost when its `CreateEntity` could not be mirrored, or the
//! mirror was destroyed, while some request was still waiting for both. A
//! later `SpawnResponse` naming a lost id fails the request.
//!
//! The completion callback is moved out of the tracker when the request
//! completes, so it can run at most once.

use std::collections::{HashMap, HashSet};
use std::fmt;

use replica_core::{Entity, EntityId};

use crate::types::{EntityType, RemoteId, SpawnRequestId};

/// Runs once with the spawned local entity.
pub type SpawnCallback = Box<dyn FnOnce(&mut Entity) + Send>;

/// Progress of one pending spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnState {
    /// Neither message has arrived, or only `CreateEntity` has.
    WaitingForBoth,
    /// `SpawnResponse` named `remote`, which is not materialized yet.
    HaveSpawnResponse {
        /// The server's id for the entity.
        remote: RemoteId,
    },
}

struct PendingSpawn {
    entity_type: EntityType,
    state: SpawnState,
    callback: SpawnCallback,
}

/// Result of feeding a `SpawnResponse` to the tracker.
pub enum ResponseOutcome {
    /// No pending request has this id.
    Unknown,
    /// The server could not spawn the entity.
    Failed(EntityType),
    /// Both messages are in; run the callback on `local`.
    Complete {
        /// The local entity.
        local: EntityId,
        /// The completion callback.
        callback: SpawnCallback,
    },
    /// Waiting for `CreateEntity`.
    Waiting,
}

impl fmt::Debug for ResponseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Failed(ty) => write!(f, "Failed({ty})"),
            Self::Complete { local, .. } => write!(f, "Complete({local})"),
            Self::Waiting => f.write_str("Waiting"),
        }
    }
}

/// Pending client spawn requests.
pub struct SpawnTracker {
    next_id: u32,
    pending: HashMap<SpawnRequestId, PendingSpawn>,
    awaiting_entity: HashMap<RemoteId, SpawnRequestId>,
    lost: HashSet<RemoteId>,
}

impl SpawnTracker {
    /// Creates an empty tracker. Request ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            awaiting_entity: HashMap::new(),
            lost: HashSet::new(),
        }
    }

    /// Registers a new request.
    pub fn begin(&mut self, entity_type: EntityType, callback: SpawnCallback) -> SpawnRequestId {
        let id = SpawnRequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.pending.insert(
            id,
            PendingSpawn {
                entity_type,
                state: SpawnState::WaitingForBoth,
                callback,
            },
        );
        id
    }

    /// Feeds a `SpawnResponse`. `local` is the entity already mapped to
    /// `remote`, if `CreateEntity` came first.
    pub fn on_spawn_response(
        &mut self,
        request: SpawnRequestId,
        remote: RemoteId,
        local: Option<EntityId>,
    ) -> ResponseOutcome {
        let Some(pending) = self.pending.get_mut(&request) else {
            return ResponseOutcome::Unknown;
        };
        if pending.state != SpawnState::WaitingForBoth {
            return ResponseOutcome::Unknown;
        }
        if remote.is_null() || self.lost.remove(&remote) {
            let entity_type = pending.entity_type;
            self.pending.remove(&request);
            self.forget_lost_if_idle();
            return ResponseOutcome::Failed(entity_type);
        }
        if let Some(local) = local {
            let outcome = match self.pending.remove(&request) {
                Some(pending) => ResponseOutcome::Complete {
                    local,
                    callback: pending.callback,
                },
                None => ResponseOutcome::Unknown,
            };
            self.forget_lost_if_idle();
            return outcome;
        }
        pending.state = SpawnState::HaveSpawnResponse { remote };
        self.awaiting_entity.insert(remote, request);
        self.forget_lost_if_idle();
        ResponseOutcome::Waiting
    }

    /// Lost ids only matter to requests that have not seen their response.
    fn forget_lost_if_idle(&mut self) {
        let waiting = self
            .pending
            .values()
            .any(|p| p.state == SpawnState::WaitingForBoth);
        if !waiting {
            self.lost.clear();
        }
    }

    /// Feeds a materialized entity. Returns the completed request, if one
    /// was waiting for `remote`.
    pub fn on_entity_created(&mut self, remote: RemoteId) -> Option<(SpawnRequestId, SpawnCallback)> {
        let request = self.awaiting_entity.remove(&remote)?;
        let pending = self.pending.remove(&request)?;
        Some((request, pending.callback))
    }

    /// Reports that `remote` could not be materialized locally or was
    /// destroyed. Fails the request already waiting for it; otherwise the id
    /// is remembered so a later `SpawnResponse` naming it fails.
    pub fn fail_remote(&mut self, remote: RemoteId) -> Option<SpawnRequestId> {
        let Some(request) = self.awaiting_entity.remove(&remote) else {
            let waiting = self
                .pending
                .values()
                .any(|p| p.state == SpawnState::WaitingForBoth);
            if waiting && !remote.is_null() {
                self.lost.insert(remote);
            }
            return None;
        };
        self.pending.remove(&request);
        self.forget_lost_if_idle();
        Some(request)
    }

    /// Forgets a request whose `SpawnRequest` never left this process.
    pub fn cancel(&mut self, request: SpawnRequestId) -> bool {
        let removed = self.pending.remove(&request).is_some();
        self.forget_lost_if_idle();
        removed
    }

    /// Drops every pending request, returning their ids.
    pub fn clear(&mut self) -> Vec<SpawnRequestId> {
        self.awaiting_entity.clear();
        self.lost.clear();
        let mut ids: Vec<_> = self.pending.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    /// State of a pending request.
    #[must_use]
    pub fn state(&self, request: SpawnRequestId) -> Option<SpawnState> {
        self.pending.get(&request).map(|p| p.state)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for SpawnTracker {
    fn default() -> Self {
        Self::new()
    }
}
