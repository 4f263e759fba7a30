//! Backing store abstraction.
//!
//! A store provides three things the queue needs: time-derived monotonic
//! event IDs, payload storage with a TTL, and atomic execution of a [`Plan`].
//! Plan execution is split in two: the store opens an isolated transaction
//! exposing the [`SetTxn`] primitives, and [`crate::query::interpret::execute`]
//! runs the plan against it.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::event::{Event, EventId};
use crate::model::set::{EventSet, Member};
use crate::query::{Plan, ScoreRange};

pub use memory::MemoryStore;

/// Set primitives available inside one atomic plan execution.
///
/// Every read observes every write made earlier in the same transaction.
#[async_trait]
pub trait SetTxn: Send {
    /// Members whose score lies in `range` (already resolved), ordered by
    /// (score, id), descending when `range.reverse`, truncated to `range.limit`.
    async fn range_by_score(&mut self, set: &EventSet, range: &ScoreRange) -> Result<Vec<Member>>;

    /// Members at ascending ranks `start..=stop`.
    async fn range_by_rank(&mut self, set: &EventSet, start: usize, stop: usize)
    -> Result<Vec<Member>>;

    /// Current score of `id` in `set`, if it is a member.
    async fn score_of(&mut self, set: &EventSet, id: EventId) -> Result<Option<i64>>;

    /// Insert members, replacing the score of any already present.
    async fn add(&mut self, set: &EventSet, members: &[Member]) -> Result<()>;

    async fn remove(&mut self, set: &EventSet, ids: &[EventId]) -> Result<()>;

    async fn is_empty(&mut self, set: &EventSet) -> Result<bool>;
}

/// A backing store for queues. Safe for concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    /// Issue a new, unique ID no earlier than `expire`.
    async fn new_event_id(&self, expire: DateTime<Utc>) -> Result<EventId>;

    /// Store an event's payload, retrievable until `event.expire + grace`.
    async fn put_payload(&self, event: &Event, grace: Duration) -> Result<()>;

    /// Fetch a payload. `None` once its TTL has elapsed or if never written.
    async fn get_payload(&self, id: EventId) -> Result<Option<Event>>;

    /// Execute `plan` as one atomic, isolated unit and return its final
    /// accumulator. On error nothing the plan did is kept.
    async fn execute(&self, plan: &Plan) -> Result<Vec<EventId>>;

    /// Drop payloads whose TTL has elapsed. Returns how many were removed.
    async fn purge_payloads(&self) -> Result<u64>;
}
