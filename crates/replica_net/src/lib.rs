//! # REPLICA Net - Networked Entity Replication
//!
//! Keeps authoritative entity state synchronized between a server and any
//! number of clients.
//!
//! ## Architecture
//!
//! - **Layout**: per-entity wire schema built from type-erased property and
//!   RPC bindings ([`layout`])
//! - **CNetData**: the component that makes an entity networked ([`net_data`])
//! - **Protocol**: spawn request/response, entity creation, full property
//!   snapshots and RPC forwarding ([`protocol`])
//! - **Transport**: in-process loopback and reliable ordered UDP ([`transport`])
//! - **NetInstance**: the per-frame protocol driver ([`instance`])
//!
//! ## Authority Model
//!
//! ```text
//! CLIENT (Proxy / AuthoritativeProxy)        SERVER (Authority)
//!   |                                             |
//!   |--- SpawnRequest / server RPC -------------->|
//!   |                                             | <- runs handlers, owns state
//!   |<-- CreateEntity / PropertyUpdate -----------|
//!   |<-- client RPC (owner only) -----------------|
//!   |                                             |
//! ```
//!
//! ## Example
//!
//! ```rust
//! use replica_core::Component;
//! use replica_net::layout::{RepLayout, Replicated, Rpc, RpcKey};
//! use replica_net::rep_field;
//!
//! #[derive(Default)]
//! struct Hull {
//!     points: u32,
//! }
//! impl Component for Hull {}
//!
//! impl Hull {
//!     fn repair(&mut self, amount: u32) {
//!         self.points += amount;
//!     }
//! }
//!
//! impl Replicated for Hull {
//!     fn rep_layout() -> RepLayout {
//!         RepLayout::new()
//!             .with_property(rep_field!(Hull, points: u32).into_binding())
//!             .with_rpc(Rpc::server("repair", Hull::repair).into_binding())
//!     }
//! }
//!
//! const REPAIR: RpcKey<Hull, u32> = RpcKey::new("repair");
//!
//! let layout = RepLayout::build::<(Hull,)>();
//! assert_eq!(layout.property_count(), 1);
//! assert_eq!(layout.rpc_count(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod instance;
pub mod layout;
pub mod net_data;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::{NetConfig, UdpConfig, UpdatePolicy};
pub use error::{NetError, NetResult};
pub use instance::{
    EntityTypeRegistry, NetEntityPipeline, NetEvent, NetInstance, SharedPipeline,
};
pub use layout::{RepLayout, RepProperty, Replicated, Rpc, RpcKey};
pub use net_data::{CNetData, NetHandle, NetMode};
pub use protocol::{MessageKind, NetMessage};
pub use stream::{Reader, StreamError, Streamable, Writer};
pub use transport::{ClientState, ServerState, TransportClient, TransportServer, TransportStats};
pub use types::{ClientId, EntityType, NetRole, RemoteId, RpcDirection, RpcId, SpawnRequestId};
