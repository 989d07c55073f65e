//! Live collections (alerts and mail) kept in step with the backend.

pub mod reconcile;
pub mod scheduler;

pub use reconcile::{
    DisplayedCollection, Interaction, ItemKind, ListItem, Patch, ReconciliationEngine,
    badge_visible, diff,
};
pub use scheduler::{LaneOutcome, PollTick, PollingScheduler, TickReason};
