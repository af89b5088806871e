//! # Replication Protocol
//!
//! Wire messages exchanged by net instances over any transport.
//!
//! ## Design
//!
//! - One transport message carries exactly one [`NetMessage`]
//! - Framing comes from the transport; payloads are not length-prefixed
//! - Property payloads are schema-ordered and untagged, see [`crate::layout`]

mod messages;

pub use messages::{MessageKind, NetMessage};
