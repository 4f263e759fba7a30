//! Event sets: named, score-ordered collections of event IDs.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::event::EventId;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which facet of queue state an event set holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Every live event of a queue. Shared by all consumer groups.
    #[serde(rename = "available")]
    Available,
    /// Events handed to a consumer and not yet acknowledged, by natural score.
    #[serde(rename = "inprog_id")]
    InProgressById,
    /// The same events scored by their acknowledgement deadline.
    #[serde(rename = "inprog_ack")]
    InProgressByAck,
    /// Events whose deadline passed, waiting to be handed out again.
    #[serde(rename = "redo")]
    Redo,
    /// Events a consumer group has finished.
    #[serde(rename = "done")]
    Done,
}

impl Role {
    /// Does this role hold one set per consumer group?
    pub fn is_per_group(self) -> bool {
        !matches!(self, Role::Available)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Available => "available",
            Role::InProgressById => "inprog_id",
            Role::InProgressByAck => "inprog_ack",
            Role::Redo => "redo",
            Role::Done => "done",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Role::Available),
            "inprog_id" => Ok(Role::InProgressById),
            "inprog_ack" => Ok(Role::InProgressByAck),
            "redo" => Ok(Role::Redo),
            "done" => Ok(Role::Done),
            _ => Err(Error::Other(format!("unknown event set role: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSet
// ---------------------------------------------------------------------------

/// Identity of one event set.
///
/// Sets come into existence on first write and are simply empty once their
/// last member is removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventSet {
    /// Namespace every set touched by one plan must share.
    pub base: String,
    pub role: Role,
    pub queue: String,
    /// Consumer group, for per-group roles.
    pub group: Option<String>,
}

impl EventSet {
    pub fn new(base: impl Into<String>, role: Role, queue: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            role,
            queue: queue.into(),
            group: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Stable storage key, e.g. `scoreq:emails:done:mailer`.
    pub fn key(&self) -> String {
        match &self.group {
            Some(group) => format!("{}:{}:{}:{}", self.base, self.queue, self.role, group),
            None => format!("{}:{}:{}", self.base, self.queue, self.role),
        }
    }
}

impl std::fmt::Display for EventSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// An event ID together with the score it holds in some set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: EventId,
    pub score: i64,
}

impl Member {
    pub fn new(id: EventId, score: i64) -> Self {
        Self { id, score }
    }

    /// A member carrying its natural score.
    pub fn natural(id: EventId) -> Self {
        Self {
            id,
            score: id.score(),
        }
    }
}
