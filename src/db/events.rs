//! Event ID issuance and payload storage.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::model::event::{Event, EventId, ts_score};

impl super::Db {
    /// Issue the next event ID for an event expiring at `expire`.
    ///
    /// The clock row is updated in place, so concurrent callers serialize on
    /// it and every ID is strictly greater than the last.
    pub async fn next_event_id(&self, expire: DateTime<Utc>) -> Result<EventId> {
        let row: (i64,) = sqlx::query_as(
            "UPDATE event_id_clock SET last_id = GREATEST($1, last_id + 1)
             WHERE singleton
             RETURNING last_id",
        )
        .bind(ts_score(expire))
        .fetch_one(self.pool())
        .await?;
        Ok(EventId(row.0))
    }

    /// Write a payload, retrievable until `event.expire + grace`. Payloads are
    /// immutable: a second write for the same ID is ignored.
    pub async fn insert_payload(&self, event: &Event, grace: Duration) -> Result<()> {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX);
        let ttl_at = event
            .expire
            .checked_add_signed(grace)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        sqlx::query(
            "INSERT INTO event_payloads (event_id, contents, expire_at, ttl_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event.id.0)
        .bind(&event.contents)
        .bind(event.expire)
        .bind(ttl_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a payload that has not outlived its TTL.
    pub async fn fetch_payload(&self, id: EventId) -> Result<Option<Event>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT event_id, contents FROM event_payloads
             WHERE event_id = $1 AND ttl_at > now()",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id, contents)| Event::new(EventId(id), contents)))
    }

    /// Drop payloads past their TTL. Returns how many were removed.
    pub async fn delete_expired_payloads(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM event_payloads WHERE ttl_at <= now()")
            .execute(self.pool())
            .await?
            .rows_affected();
        if removed > 0 {
            debug!(removed, "purged expired payloads");
        }
        Ok(removed)
    }
}
