//! Queue operations: enqueue, dequeue, acknowledge, sweep.
//!
//! Every operation is a [`Plan`] handed to the store in a single call, so the
//! whole inspect-decide-mutate sequence happens inside one atomic execution.
//! This is the only module that knows what the event set roles mean.

pub mod sweep;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info};

use crate::error::{Error, Result};
use crate::model::event::{Event, EventId, ts_score};
use crate::model::set::{EventSet, Role};
use crate::query::{Condition, Plan, ScoreRange, Select, Selection, Step};
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::plan::{record_plan_result, start_plan_span};

pub use sweep::{SweepReport, SweepTarget, Sweeper};

/// Default plan base for queue event sets.
pub const DEFAULT_NAMESPACE: &str = "scoreq";

/// Extra time a payload outlives its event, so a consumer handed an event at
/// the instant it expires can still read it.
pub const DEFAULT_PAYLOAD_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Identifies the caller of an operation. Used for attribution only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Client {
    pub id: String,
}

impl Client {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Add an event to a queue.
#[derive(Debug, Clone)]
pub struct AddCommand {
    pub client: Client,
    pub queue: String,
    /// The event is not delivered after this instant. The issued ID may
    /// encode a very slightly later time, which then becomes the expiry.
    pub expire: DateTime<Utc>,
    pub contents: String,
}

impl AddCommand {
    pub fn new(queue: impl Into<String>, expire: DateTime<Utc>, contents: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            queue: queue.into(),
            expire,
            contents: contents.into(),
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

/// Take the next event of a queue for a consumer group.
#[derive(Debug, Clone)]
pub struct GetCommand {
    pub client: Client,
    pub queue: String,
    pub group: String,
    /// When set, the event must be acknowledged by then or it becomes
    /// eligible for redelivery. When unset, the event counts as done at once.
    pub ack_deadline: Option<DateTime<Utc>>,
}

impl GetCommand {
    pub fn new(queue: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            queue: queue.into(),
            group: group.into(),
            ack_deadline: None,
        }
    }

    pub fn ack_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.ack_deadline = Some(deadline);
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

/// Acknowledge an event taken with an ack deadline.
#[derive(Debug, Clone)]
pub struct AckCommand {
    pub client: Client,
    pub queue: String,
    pub group: String,
    pub event: EventId,
}

impl AckCommand {
    pub fn new(queue: impl Into<String>, group: impl Into<String>, event: EventId) -> Self {
        Self {
            client: Client::default(),
            queue: queue.into(),
            group: group.into(),
            event,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

/// Queue and group names end up inside set keys, which are `:`-delimited.
fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    if value.contains(':') {
        return Err(Error::Validation(format!("{field} must not contain ':'")));
    }
    Ok(())
}

/// Steps removing every member of `set` whose natural score is at or before
/// `now`, i.e. every expired event.
fn expired_purge(set: &EventSet, now: DateTime<Utc>) -> [Step; 2] {
    [
        Step::Select(Select::new(Selection::range(
            set.clone(),
            ScoreRange::all().at_most(ts_score(now)),
        ))),
        Step::remove_from([set.clone()]),
    ]
}

// ---------------------------------------------------------------------------
// Event sets of one queue / group
// ---------------------------------------------------------------------------

struct QueueSets {
    available: EventSet,
    inprog_id: EventSet,
    inprog_ack: EventSet,
    redo: EventSet,
    done: EventSet,
}

impl QueueSets {
    fn new(base: &str, queue: &str, group: &str) -> Self {
        let per_group = |role| EventSet::new(base, role, queue).group(group);
        Self {
            available: EventSet::new(base, Role::Available, queue),
            inprog_id: per_group(Role::InProgressById),
            inprog_ack: per_group(Role::InProgressByAck),
            redo: per_group(Role::Redo),
            done: per_group(Role::Done),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Queue operations over a backing store.
///
/// Holds no per-call state; all methods take `&self` and are safe to call
/// concurrently (share it behind an `Arc`).
#[derive(Debug)]
pub struct Queue<S> {
    store: S,
    namespace: String,
    payload_grace: Duration,
}

impl<S: Store> Queue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            payload_grace: DEFAULT_PAYLOAD_GRACE,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_payload_grace(mut self, grace: Duration) -> Self {
        self.payload_grace = grace;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The event set for `role` of `queue`. `group` is ignored for
    /// `Role::Available`, which all groups share.
    pub fn event_set(&self, queue: &str, role: Role, group: &str) -> EventSet {
        let set = EventSet::new(&self.namespace, role, queue);
        if role.is_per_group() { set.group(group) } else { set }
    }

    /// Add an event to a queue and return its ID.
    ///
    /// The payload is written before the event joins `available`. If the plan
    /// then fails, the orphaned payload is left for its TTL to reclaim.
    pub async fn add(&self, cmd: AddCommand) -> Result<EventId> {
        validate_name("queue", &cmd.queue)?;
        if cmd.contents.is_empty() {
            return Err(Error::Validation("contents is required".to_string()));
        }

        let span = start_plan_span("add", &cmd.queue, None, &cmd.client.id);
        async {
            let id = self.store.new_event_id(cmd.expire).await?;
            let event = Event::new(id, cmd.contents);
            self.store.put_payload(&event, self.payload_grace).await?;

            let available = self.event_set(&cmd.queue, Role::Available, "");
            let plan = Plan::new(&self.namespace, Utc::now())
                .step(Select::new(Selection::events([id])))
                .step(Step::add_to([available]));
            let selected = self.run_plan("add", &cmd.queue, &plan).await?;
            record_plan_result(&tracing::Span::current(), selected.len());

            info!(event = %id, expire = %event.expire, "event added");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    /// Take the next event for a consumer group, or `None` if nothing is
    /// available.
    ///
    /// Preference order, decided inside one plan: the oldest event awaiting
    /// redelivery, then the event following the group's most recent one, then
    /// (for a group that has never taken anything) the queue's first event.
    /// Expired members are dropped first, so only live events are delivered.
    pub async fn get(&self, cmd: GetCommand) -> Result<Option<Event>> {
        validate_name("queue", &cmd.queue)?;
        validate_name("group", &cmd.group)?;

        let span = start_plan_span("get", &cmd.queue, Some(&cmd.group), &cmd.client.id);
        async {
            let now = Utc::now();
            let plan = self.get_plan(&cmd, now);
            let selected = self.run_plan("get", &cmd.queue, &plan).await?;
            record_plan_result(&tracing::Span::current(), selected.len());

            let Some(&id) = selected.first() else {
                debug!("nothing available");
                return Ok(None);
            };
            let event = self
                .store
                .get_payload(id)
                .await?
                .ok_or(Error::PayloadMissing(id))?;
            debug!(event = %id, deadline = ?cmd.ack_deadline, "event delivered");
            Ok(Some(event))
        }
        .instrument(span)
        .await
    }

    fn get_plan(&self, cmd: &GetCommand, now: DateTime<Utc>) -> Plan {
        let sets = QueueSets::new(&self.namespace, &cmd.queue, &cmd.group);

        // Record the selection as taken, then stop if there was one.
        let commit: Vec<Step> = match cmd.ack_deadline {
            Some(deadline) => vec![
                Step::add_to([sets.inprog_id.clone()]),
                Step::add_to_scored([sets.inprog_ack.clone()], ts_score(deadline)),
                Step::break_if(Condition::IfInput),
            ],
            None => vec![
                Step::add_to([sets.done.clone()]),
                Step::break_if(Condition::IfInput),
            ],
        };

        let oldest_live = ScoreRange::above(ts_score(now)).limit(1);
        let newest_live = oldest_live.clone().reverse();

        // Expired members never count: drop them before the branches look at
        // the group's history or the head of `available`.
        let purge: Vec<Step> = [
            &sets.available,
            &sets.redo,
            &sets.done,
            &sets.inprog_id,
        ]
        .into_iter()
        .flat_map(|set| expired_purge(set, now))
        .collect();

        Plan::new(&self.namespace, now)
            .steps(purge)
            // Redo: the oldest event whose earlier delivery was never acked.
            .step(Select::new(Selection::range(sets.redo.clone(), oldest_live)))
            .step(Step::remove_from([sets.redo.clone()]))
            .steps(commit.clone())
            // Continuation: the available event right after the most recent
            // one this group took.
            .step(Select::new(Selection::range(
                sets.inprog_id.clone(),
                newest_live.clone(),
            )))
            .step(Select::new(Selection::range(sets.done.clone(), newest_live)).union())
            .step(Select::new(Selection::range(
                sets.available.clone(),
                ScoreRange::after_input().limit(1),
            )))
            .steps(commit.clone())
            // Cold start: only for a group with no history at all.
            .step(
                Select::new(Selection::first(sets.available)).when(Condition::All(vec![
                    Condition::IfEmpty(sets.done),
                    Condition::IfEmpty(sets.inprog_id),
                ])),
            )
            .steps(commit)
    }

    /// Acknowledge an event. `true` if it was still within its deadline and
    /// is now done; `false` if the deadline was missed, in which case it may
    /// be (or may already have been) handed out again.
    pub async fn ack(&self, cmd: AckCommand) -> Result<bool> {
        validate_name("queue", &cmd.queue)?;
        validate_name("group", &cmd.group)?;

        let span = start_plan_span("ack", &cmd.queue, Some(&cmd.group), &cmd.client.id);
        async {
            let now = Utc::now();
            let sets = QueueSets::new(&self.namespace, &cmd.queue, &cmd.group);
            let plan = Plan::new(&self.namespace, now)
                .step(Select::new(Selection::ScoreOf {
                    set: sets.inprog_ack.clone(),
                    event: cmd.event,
                    min: Some(ts_score(now)),
                    max: None,
                }))
                .step(Step::break_if(Condition::IfNoInput))
                .step(Step::remove_from([sets.inprog_id, sets.inprog_ack]))
                .step(Step::add_to([sets.done]));
            let selected = self.run_plan("ack", &cmd.queue, &plan).await?;
            record_plan_result(&tracing::Span::current(), selected.len());

            let acked = !selected.is_empty();
            debug!(event = %cmd.event, acked, "ack");
            Ok(acked)
        }
        .instrument(span)
        .await
    }

    /// Move in-progress events whose ack deadline has passed into `redo`, and
    /// drop expired events from `available`, `redo` and `done`.
    ///
    /// Each of those moves is its own atomic plan; the sweep as a whole is
    /// safe to run concurrently with anything, including another sweep.
    pub async fn sweep(&self, queue: &str, group: &str) -> Result<SweepReport> {
        validate_name("queue", queue)?;
        validate_name("group", group)?;

        let span = start_plan_span("sweep", queue, Some(group), "sweeper");
        async {
            let now = Utc::now();
            let now_score = ts_score(now);
            let sets = QueueSets::new(&self.namespace, queue, group);

            let requeue = Plan::new(&self.namespace, now)
                .step(Select::new(Selection::range(
                    sets.inprog_ack.clone(),
                    ScoreRange::below(now_score),
                )))
                .step(Step::remove_from([sets.inprog_id.clone(), sets.inprog_ack.clone()]))
                .step(Step::add_to([sets.redo.clone()]));
            let requeued = self.run_plan("sweep", queue, &requeue).await?.len();

            let mut purged = 0;
            for set in [sets.available, sets.redo, sets.done] {
                let purge = Plan::new(&self.namespace, now).steps(expired_purge(&set, now));
                purged += self.run_plan("purge", queue, &purge).await?.len();
            }

            if requeued > 0 {
                metrics::sweep_requeued().add(
                    requeued as u64,
                    &[
                        KeyValue::new("queue", queue.to_string()),
                        KeyValue::new("group", group.to_string()),
                    ],
                );
                info!(requeued, "requeued events past their ack deadline");
            }
            if purged > 0 {
                debug!(purged, "purged expired events");
            }
            record_plan_result(&tracing::Span::current(), requeued);

            Ok(SweepReport {
                requeued,
                purged,
                payloads_purged: 0,
            })
        }
        .instrument(span)
        .await
    }

    /// Number of live members of one event set: events not yet expired, or
    /// for `Role::InProgressByAck`, events whose deadline has not passed.
    pub async fn len(&self, queue: &str, role: Role, group: &str) -> Result<usize> {
        validate_name("queue", queue)?;
        if role.is_per_group() {
            validate_name("group", group)?;
        }
        let now = Utc::now();
        let plan = Plan::new(&self.namespace, now).step(Select::new(Selection::range(
            self.event_set(queue, role, group),
            ScoreRange::above(ts_score(now)),
        )));
        Ok(self.run_plan("len", queue, &plan).await?.len())
    }

    /// Execute a plan, recording duration and outcome.
    async fn run_plan(&self, operation: &'static str, queue: &str, plan: &Plan) -> Result<Vec<EventId>> {
        let started = Instant::now();
        let result = self.store.execute(plan).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match &result {
            Ok(selected) if selected.is_empty() => "empty",
            Ok(_) => "selected",
            Err(_) => "error",
        };
        metrics::plan_duration_ms().record(elapsed_ms, &[KeyValue::new("operation", operation)]);
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", operation),
                KeyValue::new("result", outcome),
            ],
        );
        result
    }
}
