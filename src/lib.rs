//! # scoreq
//!
//! Consumer-group work queue built on atomic plans over score-ordered event
//! sets.
//!
//! Every queue operation ([`queue::Queue::add`], [`queue::Queue::get`],
//! [`queue::Queue::ack`]) is expressed as a declarative [`query::Plan`] and
//! executed by a [`store::Store`] as one isolated transaction. Postgres
//! ([`db::Db`]) and in-memory ([`store::MemoryStore`]) stores are provided.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod query;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{Event, EventId, EventSet, Role};
pub use query::{Condition, Plan, ScoreRange, Select, Selection, Step};
pub use queue::{AckCommand, AddCommand, Client, GetCommand, Queue};
pub use store::{MemoryStore, Store};
