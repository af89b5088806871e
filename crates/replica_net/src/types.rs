//! # Replication Types
//!
//! Small value types shared by every layer: roles, ids and type tags.

use std::fmt;
use std::hash::Hasher;

use replica_core::EntityId;
use siphasher::sip::SipHasher13;

use crate::stream::{Reader, StreamError, Streamable, Writer};

/// Authority a peer holds over one replicated entity.
///
/// Totally ordered by how much the peer may do: `None < Proxy < AuthoritativeProxy < Authority`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NetRole {
    /// Not networked.
    #[default]
    None = 0,
    /// Passive replica, receives updates only.
    Proxy = 1,
    /// Replica owned by this peer; may originate RPCs for the entity.
    AuthoritativeProxy = 2,
    /// Canonical state owner, normally the server.
    Authority = 3,
}

impl NetRole {
    /// Decodes a role from its wire byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Proxy),
            2 => Some(Self::AuthoritativeProxy),
            3 => Some(Self::Authority),
            _ => None,
        }
    }
}

impl Streamable for NetRole {
    fn write(&self, out: &mut Writer) {
        out.write_u8(*self as u8);
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        let raw = input.read_u8()?;
        Self::from_u8(raw).ok_or(StreamError::InvalidValue {
            ty: "NetRole",
            value: u64::from(raw),
        })
    }
}

/// Which side executes an RPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcDirection {
    /// Invoked by a client, executed on the server.
    Server = 0,
    /// Invoked by the server, executed on the authoritative-proxy client.
    Client = 1,
}

/// Type tag of a networked entity.
///
/// Usually the hash of a type name, see [`EntityType::named`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(pub u32);

impl EntityType {
    /// Hashes a type name into a tag. Stable across processes and builds.
    #[must_use]
    pub fn named(name: &str) -> Self {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(name.as_bytes());
        let hash = hasher.finish();
        #[allow(clippy::cast_possible_truncation)]
        let folded = (hash ^ (hash >> 32)) as u32;
        Self(folded)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type:{:08x}", self.0)
    }
}

impl Streamable for EntityType {
    fn write(&self, out: &mut Writer) {
        self.0.write(out);
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        u32::read(input).map(Self)
    }
}

/// An entity id in the server's id space, as seen by a client.
///
/// Kept distinct from [`EntityId`] so local and remote ids cannot be mixed up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(pub u32);

impl RemoteId {
    /// The null remote id, used by spawn responses to signal failure.
    pub const NULL: Self = Self(0);

    /// Returns true for the null id.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The remote id under which a server publishes its own entity.
    #[inline]
    #[must_use]
    pub const fn from_server_entity(id: EntityId) -> Self {
        Self(id.raw())
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote#{}", self.0)
    }
}

impl Streamable for RemoteId {
    fn write(&self, out: &mut Writer) {
        self.0.write(out);
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        u32::read(input).map(Self)
    }
}

/// Index of an RPC within one entity's combined layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RpcId(pub u16);

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc#{}", self.0)
    }
}

impl Streamable for RpcId {
    fn write(&self, out: &mut Writer) {
        self.0.write(out);
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        u16::read(input).map(Self)
    }
}

/// Server-side handle of one connected client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Client-chosen id correlating a spawn request with its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpawnRequestId(pub u32);

impl fmt::Display for SpawnRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spawn#{}", self.0)
    }
}

impl Streamable for SpawnRequestId {
    fn write(&self, out: &mut Writer) {
        self.0.write(out);
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        u32::read(input).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{from_bytes, to_bytes};

    #[test]
    fn test_role_ordering() {
        assert!(NetRole::None < NetRole::Proxy);
        assert!(NetRole::Proxy < NetRole::AuthoritativeProxy);
        assert!(NetRole::AuthoritativeProxy < NetRole::Authority);
        assert_eq!(NetRole::default(), NetRole::None);
    }

    #[test]
    fn test_role_wire_values() {
        assert_eq!(to_bytes(&NetRole::Authority), vec![3]);
        assert_eq!(from_bytes::<NetRole>(&[2]).unwrap(), NetRole::AuthoritativeProxy);
        assert!(from_bytes::<NetRole>(&[9]).is_err());
    }

    #[test]
    fn test_entity_type_hash_is_stable() {
        assert_eq!(EntityType::named("Ship"), EntityType::named("Ship"));
        assert_ne!(EntityType::named("Ship"), EntityType::named("Asteroid"));
    }

    #[test]
    fn test_null_remote_id() {
        assert!(RemoteId::NULL.is_null());
        assert_eq!(RemoteId::from_server_entity(EntityId::new(5)), RemoteId(5));
    }
}
