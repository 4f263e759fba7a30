//! In-process store.
//!
//! Event sets are kept as (score, id) ordered trees behind one async mutex,
//! which is held for the whole of a plan's execution. That makes every plan
//! atomic and isolated with respect to every other plan on the same store.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::model::event::{Event, EventId};
use crate::model::set::{EventSet, Member};
use crate::query::{Plan, ScoreRange, interpret};
use crate::store::{SetTxn, Store};

/// One score-ordered set.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<EventId, i64>,
    ordered: BTreeSet<(i64, EventId)>,
}

impl SortedSet {
    fn insert(&mut self, member: Member) {
        if let Some(old) = self.scores.insert(member.id, member.score) {
            self.ordered.remove(&(old, member.id));
        }
        self.ordered.insert((member.score, member.id));
    }

    fn remove(&mut self, id: EventId) {
        if let Some(old) = self.scores.remove(&id) {
            self.ordered.remove(&(old, id));
        }
    }

    fn range(&self, range: &ScoreRange) -> Vec<Member> {
        if range.is_empty() {
            return Vec::new();
        }
        let lo = match range.min {
            Bound::Included(s) => Bound::Included((s, EventId(i64::MIN))),
            Bound::Excluded(s) => Bound::Excluded((s, EventId(i64::MAX))),
            Bound::Unbounded => Bound::Unbounded,
        };
        let hi = match range.max {
            Bound::Included(s) => Bound::Included((s, EventId(i64::MAX))),
            Bound::Excluded(s) => Bound::Excluded((s, EventId(i64::MIN))),
            Bound::Unbounded => Bound::Unbounded,
        };
        let limit = range.limit.unwrap_or(usize::MAX);
        let iter = self.ordered.range((lo, hi));
        let picked: Vec<&(i64, EventId)> = if range.reverse {
            iter.rev().take(limit).collect()
        } else {
            iter.take(limit).collect()
        };
        picked
            .into_iter()
            .map(|&(score, id)| Member::new(id, score))
            .collect()
    }

    fn ranks(&self, start: usize, stop: usize) -> Vec<Member> {
        self.ordered
            .iter()
            .skip(start)
            .take((stop - start).saturating_add(1))
            .map(|&(score, id)| Member::new(id, score))
            .collect()
    }
}

/// Transaction handle over the locked set map.
struct MemoryTxn<'a> {
    sets: &'a mut HashMap<String, SortedSet>,
}

#[async_trait]
impl SetTxn for MemoryTxn<'_> {
    async fn range_by_score(&mut self, set: &EventSet, range: &ScoreRange) -> Result<Vec<Member>> {
        Ok(self
            .sets
            .get(&set.key())
            .map(|s| s.range(range))
            .unwrap_or_default())
    }

    async fn range_by_rank(
        &mut self,
        set: &EventSet,
        start: usize,
        stop: usize,
    ) -> Result<Vec<Member>> {
        Ok(self
            .sets
            .get(&set.key())
            .map(|s| s.ranks(start, stop))
            .unwrap_or_default())
    }

    async fn score_of(&mut self, set: &EventSet, id: EventId) -> Result<Option<i64>> {
        Ok(self
            .sets
            .get(&set.key())
            .and_then(|s| s.scores.get(&id).copied()))
    }

    async fn add(&mut self, set: &EventSet, members: &[Member]) -> Result<()> {
        let target = self.sets.entry(set.key()).or_default();
        for member in members {
            target.insert(*member);
        }
        Ok(())
    }

    async fn remove(&mut self, set: &EventSet, ids: &[EventId]) -> Result<()> {
        let key = set.key();
        if let Some(target) = self.sets.get_mut(&key) {
            for id in ids {
                target.remove(*id);
            }
            if target.scores.is_empty() {
                self.sets.remove(&key);
            }
        }
        Ok(())
    }

    async fn is_empty(&mut self, set: &EventSet) -> Result<bool> {
        Ok(self
            .sets
            .get(&set.key())
            .is_none_or(|s| s.scores.is_empty()))
    }
}

/// A payload and the instant it stops being retrievable.
#[derive(Debug)]
struct StoredPayload {
    event: Event,
    expires_at: DateTime<Utc>,
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, SortedSet>>,
    payloads: Mutex<HashMap<EventId, StoredPayload>>,
    last_id: Mutex<Option<EventId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently held, expired or not.
    pub async fn payload_count(&self) -> usize {
        self.payloads.lock().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn new_event_id(&self, expire: DateTime<Utc>) -> Result<EventId> {
        let mut last = self.last_id.lock().await;
        let id = EventId::next_after(expire, *last);
        *last = Some(id);
        Ok(id)
    }

    async fn put_payload(&self, event: &Event, grace: Duration) -> Result<()> {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX);
        let expires_at = event
            .expire
            .checked_add_signed(grace)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.payloads.lock().await.insert(
            event.id,
            StoredPayload {
                event: event.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_payload(&self, id: EventId) -> Result<Option<Event>> {
        let mut payloads = self.payloads.lock().await;
        let live = payloads
            .get(&id)
            .map(|stored| stored.expires_at > Utc::now());
        match live {
            Some(true) => Ok(payloads.get(&id).map(|stored| stored.event.clone())),
            Some(false) => {
                payloads.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn execute(&self, plan: &Plan) -> Result<Vec<EventId>> {
        let mut sets = self.sets.lock().await;
        let mut txn = MemoryTxn { sets: &mut *sets };
        let selected = interpret::execute(plan, &mut txn).await?;
        trace!(base = %plan.base, steps = plan.steps.len(), selected = selected.len(), "plan executed");
        Ok(selected)
    }

    async fn purge_payloads(&self) -> Result<u64> {
        let now = Utc::now();
        let mut payloads = self.payloads.lock().await;
        let before = payloads.len();
        payloads.retain(|_, stored| stored.expires_at > now);
        Ok((before - payloads.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(scores: &[(i64, i64)]) -> SortedSet {
        let mut set = SortedSet::default();
        for &(id, score) in scores {
            set.insert(Member::new(EventId(id), score));
        }
        set
    }

    fn ids(members: &[Member]) -> Vec<i64> {
        members.iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn reinsert_replaces_score() {
        let mut set = filled(&[(1, 10), (2, 20)]);
        set.insert(Member::new(EventId(1), 30));
        assert_eq!(set.ordered.len(), 2);
        assert_eq!(ids(&set.range(&ScoreRange::all())), vec![2, 1]);
    }

    #[test]
    fn range_honours_bounds_direction_and_limit() {
        let set = filled(&[(1, 10), (2, 20), (3, 30), (4, 40)]);

        assert_eq!(ids(&set.range(&ScoreRange::above(20))), vec![3, 4]);
        assert_eq!(ids(&set.range(&ScoreRange::below(30))), vec![1, 2]);
        assert_eq!(ids(&set.range(&ScoreRange::above(10).at_most(30))), vec![2, 3]);
        assert_eq!(ids(&set.range(&ScoreRange::all().reverse().limit(2))), vec![4, 3]);
        assert!(set.range(&ScoreRange::above(30).at_most(30)).is_empty());
    }

    #[test]
    fn equal_scores_order_by_id() {
        let set = filled(&[(7, 5), (3, 5), (5, 5)]);
        assert_eq!(ids(&set.range(&ScoreRange::all())), vec![3, 5, 7]);
        assert_eq!(ids(&set.range(&ScoreRange::above(4).at_most(5))), vec![3, 5, 7]);
    }

    #[test]
    fn ranks_clip_to_set_size() {
        let set = filled(&[(1, 10), (2, 20)]);
        assert_eq!(ids(&set.ranks(0, 0)), vec![1]);
        assert_eq!(ids(&set.ranks(1, 5)), vec![2]);
        assert!(set.ranks(3, 4).is_empty());
    }

    #[tokio::test]
    async fn expired_payloads_are_not_returned() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::seconds(120);
        let id = store.new_event_id(past).await.unwrap();
        store
            .put_payload(&Event::new(id, "stale"), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(store.get_payload(id).await.unwrap().is_none());
        assert_eq!(store.payload_count().await, 0);
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing_for_equal_expiry() {
        let store = MemoryStore::new();
        let expire = Utc::now();
        let a = store.new_event_id(expire).await.unwrap();
        let b = store.new_event_id(expire).await.unwrap();
        let c = store.new_event_id(expire - chrono::Duration::seconds(5)).await.unwrap();
        assert!(a < b && b < c);
    }
}
