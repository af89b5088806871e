//! # Entity Storage
//!
//! Minimal entity/component storage consumed by the replication layer.
//!
//! ## Design Philosophy
//!
//! - Entity ids are plain integers, `0` is reserved as the null id
//! - Ids are handed out monotonically and never reused
//! - Components are keyed by `TypeId`, one instance per type per entity

mod entity;
mod scene;

pub use entity::{Component, Entity, EntityId};
pub use scene::{SceneError, SceneManager};
