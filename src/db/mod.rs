//! Postgres backing store: connection pool, migrations, health check.
//!
//! Event sets live in one table keyed by set key; payloads and the event ID
//! clock live beside them. Each plan runs in its own transaction, serialized
//! against overlapping plans by advisory locks on the sets it names.

pub mod events;
pub mod sets;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::model::event::{Event, EventId};
use crate::query::Plan;
use crate::store::Store;

/// Database handle. Owns the connection pool shared by all queue operations.
#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;
        Ok(())
    }

    /// Run `SELECT 1` against the pool.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for Db {
    async fn new_event_id(&self, expire: DateTime<Utc>) -> Result<EventId> {
        self.next_event_id(expire).await
    }

    async fn put_payload(&self, event: &Event, grace: Duration) -> Result<()> {
        self.insert_payload(event, grace).await
    }

    async fn get_payload(&self, id: EventId) -> Result<Option<Event>> {
        self.fetch_payload(id).await
    }

    async fn execute(&self, plan: &Plan) -> Result<Vec<EventId>> {
        self.execute_plan(plan).await
    }

    async fn purge_payloads(&self) -> Result<u64> {
        self.delete_expired_payloads().await
    }
}
