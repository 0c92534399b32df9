//! Timer scheduling for suspended executions.
//!
//! The engine records a wake-up deadline per execution; an async drive
//! loop polls for due deadlines and hands each one back to the
//! coordinator's resume path. The store, not the scheduler, is the
//! source of truth: a lost deadline can be re-armed from `resume_at`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use courseflow_core::FlowResult;

use crate::coordinator::WorkflowCoordinator;

/// Timer seam. Implementations must tolerate re-scheduling the same
/// execution (latest deadline wins) and cancelling unknown ids.
pub trait Scheduler: Send + Sync {
    fn schedule_at(&self, execution_id: Uuid, at: DateTime<Utc>) -> FlowResult<()>;

    fn cancel(&self, execution_id: &Uuid) -> FlowResult<()>;
}

/// Deadline table for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryScheduler {
    deadlines: DashMap<Uuid, DateTime<Utc>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume_at(&self, execution_id: &Uuid) -> Option<DateTime<Utc>> {
        self.deadlines.get(execution_id).map(|d| *d)
    }

    /// Executions whose deadline has passed, without removing them.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.deadlines
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove and return all due deadlines.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self.due(now);
        for id in &due {
            self.deadlines.remove(id);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl Scheduler for InMemoryScheduler {
    fn schedule_at(&self, execution_id: Uuid, at: DateTime<Utc>) -> FlowResult<()> {
        debug!(execution_id = %execution_id, resume_at = %at, "timer armed");
        self.deadlines.insert(execution_id, at);
        Ok(())
    }

    fn cancel(&self, execution_id: &Uuid) -> FlowResult<()> {
        if self.deadlines.remove(execution_id).is_some() {
            debug!(execution_id = %execution_id, "timer cancelled");
        }
        Ok(())
    }
}

/// Poll the scheduler and resume due executions until the task is
/// aborted. Resume failures are logged and do not stop the loop.
pub async fn drive(
    scheduler: Arc<InMemoryScheduler>,
    coordinator: Arc<WorkflowCoordinator>,
    poll_interval: StdDuration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for execution_id in scheduler.drain_due(Utc::now()) {
            if let Err(err) = coordinator.resume(&execution_id) {
                warn!(execution_id = %execution_id, error = %err, "resume failed");
            }
        }
    }
}
