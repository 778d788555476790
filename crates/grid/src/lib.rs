//! Spatial grid: region cells, membership, proximity queries.
//!
//! # Invariants
//! - A world-placed entity is a member of exactly one region cell.
//! - An entity's cell reference is set iff it is top-level and placed, or its
//!   topmost ancestor is placed and it shares that ancestor's cell.
//! - Distance tests compare squared planar distance against the squared
//!   larger load range; no square roots on the query path.

mod cell;
mod config;
mod grid;

pub use cell::RegionCell;
pub use config::{GridConfig, GridError};
pub use grid::{InvariantViolation, SpatialGrid};
pub use interest_common::CellCoord;
