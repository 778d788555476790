//! Movement coordinator: the single entry point for creating, destroying,
//! moving and re-containing entities.
//!
//! Every operation updates the containment graph and the spatial grid, then
//! recomputes awareness and reports the result through a
//! [`NotificationSink`](interest_awareness::NotificationSink). Players also go
//! through the zone-in handshake (`LoggedIn → ZoningIn → ZonedIn`).

mod config;
mod coordinator;
mod geometry;
mod locks;
mod session;
mod sweep;

pub use config::{ConfigError, EngineConfig};
pub use coordinator::{ConsistencyError, MoveOutcome, MovementCoordinator, MovementError};
pub use geometry::{Destination, Geometry, GraphGeometry};
pub use locks::AwarenessLocks;
pub use session::{PlayerState, Sessions};
pub use sweep::{SweepStats, SweepTimings, Sweeper};
