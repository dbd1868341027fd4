//! Shared building blocks: typed entity identifiers.

pub mod entity_ids;
pub mod id;

pub use entity_ids::*;
pub use id::{Id, IdVersion, V4, V7};
