//! Events and their time-derived identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event ID
// ---------------------------------------------------------------------------

/// Identifier of an event.
///
/// The value is a timestamp in microseconds since the Unix epoch, derived from
/// the event's expiry. Stores bump it forward as needed so IDs are unique and
/// strictly increasing. Its numeric value is also the event's natural score in
/// every event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl EventId {
    /// The natural score of this event in an event set.
    pub fn score(self) -> i64 {
        self.0
    }

    /// The point in time this ID encodes.
    pub fn timestamp(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Smallest ID that can be issued for an event expiring at `expire`,
    /// given the last ID issued.
    pub fn next_after(expire: DateTime<Utc>, last: Option<EventId>) -> EventId {
        let wanted = expire.timestamp_micros();
        match last {
            Some(EventId(prev)) if prev >= wanted => EventId(prev + 1),
            _ => EventId(wanted),
        }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(EventId)
    }
}

/// Microsecond score for a point in time.
pub fn ts_score(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A queued unit of work.
///
/// Written once by enqueue, never updated, and dropped from the payload store
/// when its TTL runs out, independent of event set membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// After this instant the event is no longer eligible for delivery.
    /// Always equal to `id.timestamp()`.
    pub expire: DateTime<Utc>,
    /// Opaque payload.
    pub contents: String,
}

impl Event {
    pub fn new(id: EventId, contents: impl Into<String>) -> Self {
        Self {
            id,
            expire: id.timestamp(),
            contents: contents.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_after_uses_expiry_when_clock_is_behind() {
        let expire = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = EventId::next_after(expire, Some(EventId(5)));
        assert_eq!(id.0, expire.timestamp_micros());
        assert_eq!(id.timestamp(), expire);
    }

    #[test]
    fn next_after_bumps_past_last_issued() {
        let expire = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = EventId::next_after(expire, None);
        let second = EventId::next_after(expire, Some(first));
        assert!(second > first);
        assert_eq!(second.0, first.0 + 1);
    }

    #[test]
    fn event_id_parses_its_display_form() {
        let id = EventId(1_700_000_000_123_456);
        assert_eq!(id.to_string().parse::<EventId>().unwrap(), id);
    }
}
