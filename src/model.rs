//! Core data model.
//!
//! An event is a unit of queued work with a time-derived identity. Queue state
//! lives entirely in event sets: score-ordered collections of event IDs, one
//! per (queue, role, consumer group).

pub mod event;
pub mod set;

pub use event::{Event, EventId};
pub use set::{EventSet, Member, Role};
