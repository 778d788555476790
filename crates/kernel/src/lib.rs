//! World Kernel: the entity arena and the containment graph.
//!
//! # Invariants
//! - Entities are owned by the arena and addressed by id only; parent/child
//!   links are ids, so there are no ownership cycles.
//! - Containment is a forest: an entity is never its own ancestor.
//! - All relationship mutations flow through explicit [`World`] operations.

pub mod entity;
pub mod world;

pub use entity::{Containment, Entity, EntityKind};
pub use world::{GraphError, World};
