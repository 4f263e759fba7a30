//! Queue behaviour against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scoreq::queue::{SweepReport, SweepTarget, Sweeper};
use scoreq::{
    AckCommand, AddCommand, Client, Error, EventId, GetCommand, MemoryStore, Plan, Queue, Role,
    Select, Selection, Step, Store,
};

fn test_queue() -> Queue<MemoryStore> {
    Queue::new(MemoryStore::new())
}

fn in_secs(n: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(n)
}

fn in_millis(n: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(n)
}

async fn add(queue: &Queue<MemoryStore>, name: &str, contents: &str) -> EventId {
    queue
        .add(AddCommand::new(name, in_secs(60), contents))
        .await
        .unwrap()
}

async fn get(queue: &Queue<MemoryStore>, name: &str, group: &str) -> Option<EventId> {
    queue
        .get(GetCommand::new(name, group))
        .await
        .unwrap()
        .map(|e| e.id)
}

/// Get with a 30 second ack deadline.
async fn take(queue: &Queue<MemoryStore>, name: &str, group: &str) -> Option<EventId> {
    queue
        .get(GetCommand::new(name, group).ack_deadline(in_secs(30)))
        .await
        .unwrap()
        .map(|e| e.id)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_get_ack_then_drained() {
    let queue = test_queue();
    let client = Client::new("test-client");

    let e1 = queue
        .add(AddCommand::new("jobs", in_secs(60), "x").client(client.clone()))
        .await
        .unwrap();

    let event = queue
        .get(
            GetCommand::new("jobs", "g1")
                .ack_deadline(in_secs(10))
                .client(client.clone()),
        )
        .await
        .unwrap()
        .expect("should deliver e1");
    assert_eq!(event.id, e1);
    assert_eq!(event.contents, "x");
    assert_eq!(event.expire, e1.timestamp());

    let acked = queue
        .ack(AckCommand::new("jobs", "g1", e1).client(client.clone()))
        .await
        .unwrap();
    assert!(acked);

    assert!(get(&queue, "jobs", "g1").await.is_none());
}

#[tokio::test]
async fn empty_queue_returns_none() {
    let queue = test_queue();
    assert!(queue.get(GetCommand::new("jobs", "g1")).await.unwrap().is_none());
    assert!(
        queue
            .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(5)))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn ids_increase_with_insertion_order_for_equal_expiry() {
    let queue = test_queue();
    let expire = in_secs(60);
    let a = queue.add(AddCommand::new("jobs", expire, "a")).await.unwrap();
    let b = queue.add(AddCommand::new("jobs", expire, "b")).await.unwrap();
    assert!(b > a);
}

// ---------------------------------------------------------------------------
// Delivery order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continuation_skips_past_earlier_available_events() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    let e2 = add(&queue, "jobs", "2").await;
    let e3 = add(&queue, "jobs", "3").await;

    assert_eq!(get(&queue, "jobs", "g1").await, Some(e1));
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e2));
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e3));
    assert_eq!(get(&queue, "jobs", "g1").await, None);

    // Available is shared; delivery never removes from it.
    assert_eq!(queue.len("jobs", Role::Available, "").await.unwrap(), 3);
    assert_eq!(queue.len("jobs", Role::Done, "g1").await.unwrap(), 3);
}

#[tokio::test]
async fn consumer_groups_are_independent() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    let e2 = add(&queue, "jobs", "2").await;

    assert_eq!(get(&queue, "jobs", "g1").await, Some(e1));
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e2));
    assert_eq!(get(&queue, "jobs", "g2").await, Some(e1));
}

#[tokio::test]
async fn events_added_after_drain_are_delivered() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e1));
    assert_eq!(get(&queue, "jobs", "g1").await, None);

    let e2 = add(&queue, "jobs", "2").await;
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e2));
}

#[tokio::test]
async fn queues_do_not_share_events() {
    let queue = test_queue();
    let a = add(&queue, "alpha", "a").await;
    let b = add(&queue, "beta", "b").await;

    assert_eq!(get(&queue, "alpha", "g").await, Some(a));
    assert_eq!(get(&queue, "alpha", "g").await, None);
    assert_eq!(get(&queue, "beta", "g").await, Some(b));
}

#[tokio::test]
async fn redo_is_served_before_fresh_events() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    let e2 = add(&queue, "jobs", "2").await;

    // Deadline already in the past: the sweep will consider it missed.
    let taken = queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(-1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.id, e1);

    let report = queue.sweep("jobs", "g1").await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(queue.len("jobs", Role::Redo, "g1").await.unwrap(), 1);
    assert_eq!(queue.len("jobs", Role::InProgressById, "g1").await.unwrap(), 0);

    assert_eq!(get(&queue, "jobs", "g1").await, Some(e1));
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e2));
    assert_eq!(get(&queue, "jobs", "g1").await, None);
}

#[tokio::test]
async fn continuation_resumes_after_oldest_cursor() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    let e2 = add(&queue, "jobs", "2").await;
    add(&queue, "jobs", "3").await;

    assert_eq!(take(&queue, "jobs", "g1").await, Some(e1));
    assert!(queue.ack(AckCommand::new("jobs", "g1", e1)).await.unwrap());
    assert_eq!(take(&queue, "jobs", "g1").await, Some(e2));

    // Newest in progress (e2) and newest done (e1): the smaller one wins, so
    // e2 is handed out again.
    assert_eq!(take(&queue, "jobs", "g1").await, Some(e2));
}

#[tokio::test]
async fn redo_wins_over_older_undelivered_event() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    let e2 = add(&queue, "jobs", "2").await;

    // The group holds e2 with a missed deadline while e1 is still untouched.
    let mark_in_progress = Plan::new(queue.namespace(), Utc::now())
        .step(Select::new(Selection::events([e2])))
        .step(Step::add_to([queue.event_set("jobs", Role::InProgressById, "g1")]))
        .step(Step::add_to_scored(
            [queue.event_set("jobs", Role::InProgressByAck, "g1")],
            in_secs(-1).timestamp_micros(),
        ));
    queue.store().execute(&mark_in_progress).await.unwrap();
    assert_eq!(queue.sweep("jobs", "g1").await.unwrap().requeued, 1);

    assert!(e2 > e1);
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e2));
}

// ---------------------------------------------------------------------------
// Acknowledgement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ack_after_deadline_fails_and_sweep_redelivers() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;

    let taken = queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(Utc::now()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.id, e1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!queue.ack(AckCommand::new("jobs", "g1", e1)).await.unwrap());

    // Still in progress until swept, so nothing new is handed out.
    assert_eq!(get(&queue, "jobs", "g1").await, None);

    queue.sweep("jobs", "g1").await.unwrap();
    assert_eq!(get(&queue, "jobs", "g1").await, Some(e1));
}

#[tokio::test]
async fn second_ack_returns_false() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(30)))
        .await
        .unwrap()
        .unwrap();

    assert!(queue.ack(AckCommand::new("jobs", "g1", e1)).await.unwrap());
    assert!(!queue.ack(AckCommand::new("jobs", "g1", e1)).await.unwrap());
    assert_eq!(queue.len("jobs", Role::InProgressByAck, "g1").await.unwrap(), 0);
    assert_eq!(queue.len("jobs", Role::Done, "g1").await.unwrap(), 1);
}

#[tokio::test]
async fn ack_from_another_group_is_rejected() {
    let queue = test_queue();
    let e1 = add(&queue, "jobs", "1").await;
    queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(30)))
        .await
        .unwrap();

    assert!(!queue.ack(AckCommand::new("jobs", "g2", e1)).await.unwrap());
    assert!(queue.ack(AckCommand::new("jobs", "g1", e1)).await.unwrap());
}

#[tokio::test]
async fn unacked_in_progress_event_is_not_swept_before_deadline() {
    let queue = test_queue();
    add(&queue, "jobs", "1").await;
    queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(30)))
        .await
        .unwrap();

    let report = queue.sweep("jobs", "g1").await.unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(queue.len("jobs", Role::InProgressByAck, "g1").await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

async fn concurrent_gets(deadline: bool) -> Vec<EventId> {
    let queue = Arc::new(test_queue());
    for i in 0..20 {
        add(&queue, "jobs", &format!("event-{i}")).await;
    }

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..10 {
        let queue = Arc::clone(&queue);
        tasks.spawn(async move {
            let mut cmd =
                GetCommand::new("jobs", "workers").client(Client::new(format!("worker-{worker}")));
            if deadline {
                cmd = cmd.ack_deadline(in_secs(30));
            }
            queue.get(cmd).await
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let event = joined.unwrap().unwrap().expect("20 events for 10 workers");
        ids.push(event.id);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gets_with_deadline_return_distinct_events() {
    let ids = concurrent_gets(true).await;
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 10);
    assert_eq!(distinct.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gets_without_deadline_return_distinct_events() {
    let ids = concurrent_gets(false).await;
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), 10);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_errors_precede_store_access() {
    let queue = test_queue();

    let err = queue
        .add(AddCommand::new("", in_secs(60), "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = queue
        .add(AddCommand::new("jobs", in_secs(60), ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(queue.store().payload_count().await, 0);

    let err = queue.get(GetCommand::new("jobs", "")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = queue
        .ack(AckCommand::new("jobs", "a:b", EventId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ---------------------------------------------------------------------------
// Expiry and sweeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_purges_expired_events() {
    let queue = test_queue();
    queue
        .add(AddCommand::new("jobs", in_secs(-60), "stale"))
        .await
        .unwrap();
    let fresh = add(&queue, "jobs", "fresh").await;

    let report = queue.sweep("jobs", "g1").await.unwrap();
    assert_eq!(report.purged, 1);
    assert_eq!(get(&queue, "jobs", "g1").await, Some(fresh));
}

#[tokio::test]
async fn expired_head_is_skipped_without_sweep() {
    let queue = test_queue();
    queue
        .add(AddCommand::new("jobs", in_secs(-60), "stale"))
        .await
        .unwrap();
    let fresh = add(&queue, "jobs", "fresh").await;

    let event = queue
        .get(GetCommand::new("jobs", "g1"))
        .await
        .unwrap()
        .expect("fresh event should be delivered");
    assert_eq!(event.id, fresh);
    assert_eq!(event.contents, "fresh");
    assert_eq!(get(&queue, "jobs", "g1").await, None);
}

#[tokio::test]
async fn event_expired_within_payload_grace_is_not_delivered() {
    let queue = test_queue();
    queue
        .add(AddCommand::new("jobs", in_secs(-5), "stale"))
        .await
        .unwrap();
    let fresh = add(&queue, "jobs", "fresh").await;

    assert_eq!(get(&queue, "jobs", "g1").await, Some(fresh));
}

#[tokio::test]
async fn expired_done_history_does_not_stall_group() {
    let queue = test_queue();
    let short = queue
        .add(AddCommand::new("jobs", in_millis(250), "short"))
        .await
        .unwrap();
    assert_eq!(get(&queue, "jobs", "g1").await, Some(short));

    let long = add(&queue, "jobs", "long").await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(get(&queue, "jobs", "g1").await, Some(long));
    assert_eq!(get(&queue, "jobs", "g1").await, None);
}

#[tokio::test]
async fn expired_in_progress_history_does_not_stall_group() {
    let queue = test_queue();
    let short = queue
        .add(AddCommand::new("jobs", in_millis(250), "short"))
        .await
        .unwrap();
    let taken = queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(30)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.id, short);

    let long = add(&queue, "jobs", "long").await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(get(&queue, "jobs", "g1").await, Some(long));
}

#[tokio::test]
async fn sweeper_tick_covers_targets_and_payloads() {
    let queue = Arc::new(test_queue());
    // IDs only grow, so the expired event has to be issued first.
    queue
        .add(AddCommand::new("old", in_secs(-60), "stale"))
        .await
        .unwrap();
    let e1 = add(&queue, "jobs", "1").await;
    let taken = queue
        .get(GetCommand::new("jobs", "g1").ack_deadline(in_secs(-1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.id, e1);

    let sweeper = Sweeper::new(
        Arc::clone(&queue),
        vec![SweepTarget::new("jobs", "g1"), SweepTarget::new("old", "g1")],
        Duration::from_secs(60),
    );
    let report = sweeper.tick().await;
    assert_eq!(
        report,
        SweepReport {
            requeued: 1,
            purged: 1,
            payloads_purged: 1,
        }
    );
    assert_eq!(queue.store().payload_count().await, 1);
}

#[tokio::test]
async fn sweeper_run_stops_on_shutdown() {
    let queue = Arc::new(test_queue());
    let sweeper = Sweeper::new(queue, vec![SweepTarget::new("jobs", "g1")], Duration::from_millis(10));

    let runner = sweeper.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    sweeper.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweeper should stop")
        .unwrap();
    assert!(result.is_ok());
}

#[test]
fn sweep_target_parses_queue_slash_group() {
    let target: SweepTarget = "jobs/workers".parse().unwrap();
    assert_eq!(target, SweepTarget::new("jobs", "workers"));
    assert!("jobs".parse::<SweepTarget>().is_err());
    assert!("/workers".parse::<SweepTarget>().is_err());
}
