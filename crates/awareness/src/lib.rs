//! Awareness bookkeeping: who can see whom, and what the network layer hears
//! about it.
//!
//! The ledger caches each entity's last computed awareness set. Updates are
//! applied to both sides of a relationship at once, so `a` observes `b`
//! exactly when `b` observes `a`.

mod ledger;
pub mod notify;

pub use ledger::{AsymmetricPair, AwarenessLedger, Transitions};
pub use notify::{AwarenessChange, Direction, DisconnectReason, Notification, NotificationSink};
