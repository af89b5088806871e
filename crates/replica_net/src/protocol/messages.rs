//! # Replication Messages
//!
//! Every message is a one-byte [`MessageKind`] tag followed by the kind's
//! fields in declaration order. Property and RPC payloads run to the end of
//! the message and carry no length prefix.

use crate::stream::{Reader, StreamError, Streamable, Writer};
use crate::types::{EntityType, NetRole, RemoteId, RpcId, SpawnRequestId};

/// Message tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client -> Server: create an entity for me.
    SpawnRequest = 1,
    /// Bidirectional: invoke an RPC on an entity.
    Rpc = 2,
    /// Server -> Client: a replicated entity appeared.
    CreateEntity = 3,
    /// Server -> Client: full property state of an entity.
    PropertyUpdate = 4,
    /// Server -> Client: answer to a spawn request.
    SpawnResponse = 5,
    /// Server -> Client: an entity stopped being replicated.
    DestroyEntity = 6,
    /// Server -> Client: the receiver's role for an entity changed.
    SetRole = 7,
}

impl MessageKind {
    /// Decodes a tag byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SpawnRequest),
            2 => Some(Self::Rpc),
            3 => Some(Self::CreateEntity),
            4 => Some(Self::PropertyUpdate),
            5 => Some(Self::SpawnResponse),
            6 => Some(Self::DestroyEntity),
            7 => Some(Self::SetRole),
            _ => None,
        }
    }

    /// Returns true if a server may receive this kind.
    #[must_use]
    pub const fn server_accepts(self) -> bool {
        matches!(self, Self::SpawnRequest | Self::Rpc)
    }

    /// Returns true if a client may receive this kind.
    #[must_use]
    pub const fn client_accepts(self) -> bool {
        !matches!(self, Self::SpawnRequest)
    }
}

/// A decoded replication message. Entity ids are always the server's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetMessage {
    /// Ask the server to spawn an entity of `entity_type`.
    SpawnRequest {
        /// Client-chosen correlation id.
        request_id: SpawnRequestId,
        /// Type of entity to spawn.
        entity_type: EntityType,
        /// Make the requester the entity's authoritative proxy.
        authoritative_proxy: bool,
    },
    /// Invoke an RPC.
    Rpc {
        /// Target entity.
        entity_id: RemoteId,
        /// RPC id within the entity's layout.
        rpc_id: RpcId,
        /// Encoded arguments.
        payload: Vec<u8>,
    },
    /// Materialize a replicated entity.
    CreateEntity {
        /// The entity.
        entity_id: RemoteId,
        /// Its type, handed to the entity pipeline.
        entity_type: EntityType,
        /// Role the receiver holds.
        role: NetRole,
        /// Full property state.
        payload: Vec<u8>,
    },
    /// Overwrite an entity's properties.
    PropertyUpdate {
        /// The entity.
        entity_id: RemoteId,
        /// Full property state.
        payload: Vec<u8>,
    },
    /// Result of a spawn request; a null id means failure.
    SpawnResponse {
        /// Correlation id from the request.
        request_id: SpawnRequestId,
        /// The spawned entity, or [`RemoteId::NULL`].
        entity_id: RemoteId,
    },
    /// Drop the local mirror of an entity.
    DestroyEntity {
        /// The entity.
        entity_id: RemoteId,
    },
    /// Change the receiver's role for an entity.
    SetRole {
        /// The entity.
        entity_id: RemoteId,
        /// New role.
        role: NetRole,
    },
}

impl NetMessage {
    /// Tag of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::SpawnRequest { .. } => MessageKind::SpawnRequest,
            Self::Rpc { .. } => MessageKind::Rpc,
            Self::CreateEntity { .. } => MessageKind::CreateEntity,
            Self::PropertyUpdate { .. } => MessageKind::PropertyUpdate,
            Self::SpawnResponse { .. } => MessageKind::SpawnResponse,
            Self::DestroyEntity { .. } => MessageKind::DestroyEntity,
            Self::SetRole { .. } => MessageKind::SetRole,
        }
    }

    /// Appends the encoded message to `out`.
    pub fn encode_into(&self, out: &mut Writer) {
        out.write_u8(self.kind() as u8);
        match self {
            Self::SpawnRequest {
                request_id,
                entity_type,
                authoritative_proxy,
            } => {
                request_id.write(out);
                entity_type.write(out);
                authoritative_proxy.write(out);
            }
            Self::Rpc {
                entity_id,
                rpc_id,
                payload,
            } => {
                entity_id.write(out);
                rpc_id.write(out);
                out.write_bytes(payload);
            }
            Self::CreateEntity {
                entity_id,
                entity_type,
                role,
                payload,
            } => {
                entity_id.write(out);
                entity_type.write(out);
                role.write(out);
                out.write_bytes(payload);
            }
            Self::PropertyUpdate { entity_id, payload } => {
                entity_id.write(out);
                out.write_bytes(payload);
            }
            Self::SpawnResponse {
                request_id,
                entity_id,
            } => {
                request_id.write(out);
                entity_id.write(out);
            }
            Self::DestroyEntity { entity_id } => entity_id.write(out),
            Self::SetRole { entity_id, role } => {
                entity_id.write(out);
                role.write(out);
            }
        }
    }

    /// Encodes the message into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Writer::new();
        self.encode_into(&mut out);
        out.into_inner()
    }

    /// Decodes one whole message.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tag, truncated fields, or trailing bytes after a
    /// message without payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        let mut input = Reader::new(bytes);
        let tag = input.read_u8()?;
        let kind = MessageKind::from_u8(tag).ok_or(StreamError::InvalidValue {
            ty: "MessageKind",
            value: u64::from(tag),
        })?;

        let message = match kind {
            MessageKind::SpawnRequest => Self::SpawnRequest {
                request_id: Streamable::read(&mut input)?,
                entity_type: Streamable::read(&mut input)?,
                authoritative_proxy: Streamable::read(&mut input)?,
            },
            MessageKind::Rpc => Self::Rpc {
                entity_id: Streamable::read(&mut input)?,
                rpc_id: Streamable::read(&mut input)?,
                payload: input.rest().to_vec(),
            },
            MessageKind::CreateEntity => Self::CreateEntity {
                entity_id: Streamable::read(&mut input)?,
                entity_type: Streamable::read(&mut input)?,
                role: Streamable::read(&mut input)?,
                payload: input.rest().to_vec(),
            },
            MessageKind::PropertyUpdate => Self::PropertyUpdate {
                entity_id: Streamable::read(&mut input)?,
                payload: input.rest().to_vec(),
            },
            MessageKind::SpawnResponse => Self::SpawnResponse {
                request_id: Streamable::read(&mut input)?,
                entity_id: Streamable::read(&mut input)?,
            },
            MessageKind::DestroyEntity => Self::DestroyEntity {
                entity_id: Streamable::read(&mut input)?,
            },
            MessageKind::SetRole => Self::SetRole {
                entity_id: Streamable::read(&mut input)?,
                role: Streamable::read(&mut input)?,
            },
        };

        if !input.is_empty() {
            return Err(StreamError::InvalidValue {
                ty: "trailing bytes",
                value: input.remaining() as u64,
            });
        }
        Ok(message)
    }
}
