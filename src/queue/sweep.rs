//! Background redelivery sweeper.
//!
//! Runs [`Queue::sweep`] for a fixed set of (queue, group) targets on an
//! interval, then purges payloads whose TTL has elapsed. Failures are logged
//! and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::Store;

use super::Queue;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// In-progress events moved to `redo`.
    pub requeued: usize,
    /// Expired events removed from event sets.
    pub purged: usize,
    /// Payloads removed from the payload store.
    pub payloads_purged: u64,
}

impl std::ops::AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.requeued += other.requeued;
        self.purged += other.purged;
        self.payloads_purged += other.payloads_purged;
    }
}

/// A consumer group of a queue to sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepTarget {
    pub queue: String,
    pub group: String,
}

impl SweepTarget {
    pub fn new(queue: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            group: group.into(),
        }
    }
}

impl std::str::FromStr for SweepTarget {
    type Err = crate::error::Error;

    /// Parses `queue/group`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((queue, group)) if !queue.is_empty() && !group.is_empty() => {
                Ok(Self::new(queue, group))
            }
            _ => Err(crate::error::Error::Validation(format!(
                "sweep target must look like queue/group, got {s:?}"
            ))),
        }
    }
}

/// Periodically sweeps a set of targets until shut down.
pub struct Sweeper<S> {
    queue: Arc<Queue<S>>,
    targets: Arc<Vec<SweepTarget>>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl<S> Clone for Sweeper<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            targets: Arc::clone(&self.targets),
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S: Store> Sweeper<S> {
    pub fn new(queue: Arc<Queue<S>>, targets: Vec<SweepTarget>, interval: Duration) -> Self {
        Self {
            queue,
            targets: Arc::new(targets),
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the sweeper to stop. Takes effect even if `run` has not
    /// started waiting yet.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Sweep every target once, then purge expired payloads.
    pub async fn tick(&self) -> SweepReport {
        let mut total = SweepReport::default();
        for target in self.targets.iter() {
            match self.queue.sweep(&target.queue, &target.group).await {
                Ok(report) => total += report,
                Err(e) => {
                    warn!(queue = %target.queue, group = %target.group, "sweep failed: {e}");
                }
            }
        }
        match self.queue.store().purge_payloads().await {
            Ok(n) => total.payloads_purged += n,
            Err(e) => warn!("payload purge failed: {e}"),
        }
        total
    }

    /// Sweep on every interval until [`Sweeper::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            targets = self.targets.len(),
            interval_ms = self.interval.as_millis() as u64,
            "sweeper started"
        );
        loop {
            let report = self.tick().await;
            if report != SweepReport::default() {
                info!(
                    requeued = report.requeued,
                    purged = report.purged,
                    payloads_purged = report.payloads_purged,
                    "sweep complete"
                );
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("sweeper shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
