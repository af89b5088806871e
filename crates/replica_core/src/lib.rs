//! # REPLICA Core
//!
//! The engine-side collaborators the replication layer is written against:
//!
//! - **Scene**: owns entities, hands out entity ids that are never recycled
//! - **Entity**: a bag of components keyed by their Rust type
//! - **Events**: a channel based event system used to announce connection changes
//!
//! ## Example
//!
//! ```rust
//! use replica_core::{Component, SceneManager};
//!
//! struct Hull(u32);
//! impl Component for Hull {}
//!
//! let mut scene = SceneManager::new();
//! let id = scene.spawn().id();
//! scene.find_entity_mut(id).unwrap().add_component(Hull(100));
//! assert!(scene.find_entity(id).unwrap().has_component::<Hull>());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ecs;
pub mod events;

pub use ecs::{Component, Entity, EntityId, SceneError, SceneManager};
pub use events::{EventChannel, EventSystem};
