//! # Replication Error Types
//!
//! Errors returned to game code. Failures while handling inbound network
//! messages are logged and dropped instead of surfacing here.

use replica_core::{EntityId, SceneError};
use thiserror::Error;

use crate::stream::StreamError;
use crate::transport::TransportError;
use crate::types::{EntityType, RpcDirection, RpcId};

/// Errors that can occur in the replication layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// A value stream could not be decoded.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The transport refused an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The scene refused an operation.
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    /// A layout was used before being bound to its entity.
    #[error("replication layout of entity {0} used before it was bound")]
    LayoutNotBound(EntityId),

    /// A layout was bound a second time.
    #[error("replication layout of entity {0} is already bound")]
    LayoutAlreadyBound(EntityId),

    /// A property or RPC refers to a component the entity lacks.
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        /// The entity.
        entity: EntityId,
        /// Type name of the missing component.
        component: &'static str,
    },

    /// The entity is not networked.
    #[error("entity {0} has no CNetData component")]
    MissingNetData(EntityId),

    /// The entity is already networked.
    #[error("entity {0} already has a CNetData component")]
    NetDataExists(EntityId),

    /// No entity with this id exists.
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    /// No entity type is registered under this tag.
    #[error("unknown entity type {0}")]
    UnknownEntityType(EntityType),

    /// The entity is not in the replicated set.
    #[error("entity {0} is not replicated")]
    NotReplicated(EntityId),

    /// The entity's layout has no RPC under this id.
    #[error("entity {entity} has no {rpc}")]
    UnknownRpc {
        /// The entity.
        entity: EntityId,
        /// The unknown id.
        rpc: RpcId,
    },

    /// The entity's layout has no RPC with this name on this component.
    #[error("entity {entity} has no rpc `{name}` on {component}")]
    UnknownRpcName {
        /// The entity.
        entity: EntityId,
        /// Type name of the component.
        component: &'static str,
        /// RPC name.
        name: &'static str,
    },

    /// An RPC was invoked in the wrong direction for its binding.
    #[error("{rpc} is a {expected:?} rpc, invoked as {actual:?}")]
    RpcDirectionMismatch {
        /// The RPC.
        rpc: RpcId,
        /// Direction the binding was declared with.
        expected: RpcDirection,
        /// Direction it was invoked with.
        actual: RpcDirection,
    },

    /// More RPCs than fit in a 16-bit id.
    #[error("rpc id space exhausted")]
    RpcIdSpaceExhausted,

    /// The operation is only valid on a server instance.
    #[error("operation requires a server instance")]
    NotServer,

    /// The operation is only valid on a client instance.
    #[error("operation requires a client instance")]
    NotClient,

    /// The net instance that owned this handle is gone.
    #[error("net instance dropped")]
    InstanceGone,

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for replication operations.
pub type NetResult<T> = Result<T, NetError>;
