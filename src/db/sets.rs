//! Event set primitives over Postgres, and atomic plan execution.

use std::ops::Bound;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::trace;

use crate::error::Result;
use crate::model::event::EventId;
use crate::model::set::{EventSet, Member};
use crate::query::{Plan, ScoreRange, interpret};
use crate::store::SetTxn;

/// A plan's transaction. Dropping it without committing rolls back.
pub(crate) struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SetTxn for PgTxn {
    async fn range_by_score(&mut self, set: &EventSet, range: &ScoreRange) -> Result<Vec<Member>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT event_id, score FROM event_set_members WHERE set_key = ");
        qb.push_bind(set.key());
        match range.min {
            Bound::Included(v) => {
                qb.push(" AND score >= ").push_bind(v);
            }
            Bound::Excluded(v) => {
                qb.push(" AND score > ").push_bind(v);
            }
            Bound::Unbounded => {}
        }
        match range.max {
            Bound::Included(v) => {
                qb.push(" AND score <= ").push_bind(v);
            }
            Bound::Excluded(v) => {
                qb.push(" AND score < ").push_bind(v);
            }
            Bound::Unbounded => {}
        }
        qb.push(if range.reverse {
            " ORDER BY score DESC, event_id DESC"
        } else {
            " ORDER BY score ASC, event_id ASC"
        });
        if let Some(limit) = range.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        Ok(rows
            .into_iter()
            .map(|(id, score)| Member::new(EventId(id), score))
            .collect())
    }

    async fn range_by_rank(
        &mut self,
        set: &EventSet,
        start: usize,
        stop: usize,
    ) -> Result<Vec<Member>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT event_id, score FROM event_set_members
             WHERE set_key = $1
             ORDER BY score ASC, event_id ASC
             OFFSET $2 LIMIT $3",
        )
        .bind(set.key())
        .bind(i64::try_from(start).unwrap_or(i64::MAX))
        .bind(i64::try_from((stop - start).saturating_add(1)).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, score)| Member::new(EventId(id), score))
            .collect())
    }

    async fn score_of(&mut self, set: &EventSet, id: EventId) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT score FROM event_set_members WHERE set_key = $1 AND event_id = $2",
        )
        .bind(set.key())
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(score,)| score))
    }

    async fn add(&mut self, set: &EventSet, members: &[Member]) -> Result<()> {
        let ids: Vec<i64> = members.iter().map(|m| m.id.0).collect();
        let scores: Vec<i64> = members.iter().map(|m| m.score).collect();
        sqlx::query(
            "INSERT INTO event_set_members (set_key, event_id, score)
             SELECT $1, m.event_id, m.score FROM UNNEST($2::bigint[], $3::bigint[]) AS m(event_id, score)
             ON CONFLICT (set_key, event_id) DO UPDATE SET score = EXCLUDED.score",
        )
        .bind(set.key())
        .bind(ids)
        .bind(scores)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn remove(&mut self, set: &EventSet, ids: &[EventId]) -> Result<()> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        sqlx::query("DELETE FROM event_set_members WHERE set_key = $1 AND event_id = ANY($2)")
            .bind(set.key())
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn is_empty(&mut self, set: &EventSet) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT NOT EXISTS (SELECT 1 FROM event_set_members WHERE set_key = $1)",
        )
        .bind(set.key())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.0)
    }
}

impl super::Db {
    /// Execute a plan in one transaction.
    ///
    /// Before the first step, a transaction-scoped advisory lock is taken on
    /// every set the plan names, in set order, so plans over overlapping sets
    /// run one after the other and never deadlock each other.
    pub async fn execute_plan(&self, plan: &Plan) -> Result<Vec<EventId>> {
        let mut tx = self.pool().begin().await?;
        for set in plan.sets() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(set.key())
                .execute(&mut *tx)
                .await?;
        }

        let mut txn = PgTxn { tx };
        let selected = interpret::execute(plan, &mut txn).await?;
        txn.tx.commit().await?;

        trace!(base = %plan.base, steps = plan.steps.len(), selected = selected.len(), "plan committed");
        Ok(selected)
    }
}
