//! Per-user execution admission control.
//!
//! Checks run in a fixed order and short-circuit on the first denial:
//! concurrency, lifetime count, cooldown, then frequency caps. Send
//! history is read from the stored execution records, so caps survive a
//! restart along with the executions themselves.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::store::ExecutionStore;
use crate::types::{Execution, WorkflowSettings};

/// Why a trigger was rejected by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The user already has a non-terminal execution of this workflow.
    AlreadyActive,
    /// Lifetime execution count for this user reached the configured cap.
    MaxExecutionsReached,
    /// The most recent execution started within the cooldown window.
    InCooldown,
    /// An email frequency cap window is full.
    FrequencyCapped(CapWindow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapWindow {
    Day,
    Week,
    Month,
}

impl CapWindow {
    fn duration(self) -> Duration {
        match self {
            CapWindow::Day => Duration::days(1),
            CapWindow::Week => Duration::days(7),
            CapWindow::Month => Duration::days(30),
        }
    }
}

/// Gates new executions per workflow and user. Holds no state of its
/// own; every check reads the execution store, including the per-record
/// email send timestamps the coordinator appends on delivery.
pub struct ExecutionLimiter {
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionLimiter {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// First failing check, or `None` when the trigger may proceed.
    pub fn deny_reason(
        &self,
        workflow_id: &Uuid,
        user_id: &str,
        settings: &WorkflowSettings,
        now: DateTime<Utc>,
    ) -> Option<DenyReason> {
        if self.store.active_execution(workflow_id, user_id).is_some() {
            return Some(DenyReason::AlreadyActive);
        }

        let history = self.store.executions_for(workflow_id, user_id);

        if let Some(max) = settings.max_executions_per_user {
            if history.len() as u32 >= max {
                return Some(DenyReason::MaxExecutionsReached);
            }
        }

        if let Some(cooldown) = &settings.cooldown {
            let latest = history.iter().map(|e| e.started_at).max();
            if let Some(started) = latest {
                if now - started < cooldown.as_duration() {
                    return Some(DenyReason::InCooldown);
                }
            }
        }

        if let Some(caps) = &settings.frequency_capping {
            let windows = [
                (caps.max_per_day, CapWindow::Day),
                (caps.max_per_week, CapWindow::Week),
                (caps.max_per_month, CapWindow::Month),
            ];
            for (cap, window) in windows {
                if let Some(cap) = cap {
                    if sends_since(&history, now - window.duration()) >= cap {
                        debug!(
                            workflow_id = %workflow_id,
                            user_id = %user_id,
                            window = ?window,
                            cap,
                            "frequency cap reached"
                        );
                        return Some(DenyReason::FrequencyCapped(window));
                    }
                }
            }
        }

        None
    }

    pub fn can_execute(
        &self,
        workflow_id: &Uuid,
        user_id: &str,
        settings: &WorkflowSettings,
        now: DateTime<Utc>,
    ) -> bool {
        self.deny_reason(workflow_id, user_id, settings, now).is_none()
    }
}

fn sends_since(history: &[Execution], cutoff: DateTime<Utc>) -> u32 {
    history
        .iter()
        .map(|e| e.email_sends.iter().filter(|at| **at >= cutoff).count())
        .sum::<usize>() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExecutionStore, InMemoryExecutionStore};
    use crate::types::{Cooldown, DelayUnit, Execution, ExecutionStatus, FrequencyCaps};
    use serde_json::json;

    fn setup() -> (Arc<InMemoryExecutionStore>, ExecutionLimiter) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let limiter = ExecutionLimiter::new(store.clone());
        (store, limiter)
    }

    fn finished_execution(workflow_id: Uuid, user_id: &str, started_at: DateTime<Utc>) -> Execution {
        let mut e = Execution::new(workflow_id, user_id, json!({}), serde_json::Map::new());
        e.started_at = started_at;
        e.status = ExecutionStatus::Completed;
        e.finished_at = Some(started_at);
        e
    }

    fn execution_with_sends(
        workflow_id: Uuid,
        user_id: &str,
        sends: Vec<DateTime<Utc>>,
    ) -> Execution {
        let mut e = finished_execution(workflow_id, user_id, Utc::now() - Duration::days(90));
        e.email_sends = sends;
        e
    }

    #[test]
    fn test_denies_concurrent_execution() {
        let (store, limiter) = setup();
        let wf = Uuid::new_v4();
        let settings = WorkflowSettings::default();
        let now = Utc::now();

        assert_eq!(limiter.deny_reason(&wf, "u1", &settings, now), None);

        store
            .insert(Execution::new(wf, "u1", json!({}), serde_json::Map::new()))
            .unwrap();
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::AlreadyActive)
        );
        // Other users are unaffected.
        assert_eq!(limiter.deny_reason(&wf, "u2", &settings, now), None);
    }

    #[test]
    fn test_denies_over_lifetime_cap() {
        let (store, limiter) = setup();
        let wf = Uuid::new_v4();
        let settings = WorkflowSettings {
            max_executions_per_user: Some(2),
            ..Default::default()
        };
        let now = Utc::now();
        let long_ago = now - Duration::days(100);

        store.insert(finished_execution(wf, "u1", long_ago)).unwrap();
        assert_eq!(limiter.deny_reason(&wf, "u1", &settings, now), None);

        store.insert(finished_execution(wf, "u1", long_ago)).unwrap();
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::MaxExecutionsReached)
        );
    }

    #[test]
    fn test_denies_within_cooldown() {
        let (store, limiter) = setup();
        let wf = Uuid::new_v4();
        let settings = WorkflowSettings {
            cooldown: Some(Cooldown {
                amount: 2,
                unit: DelayUnit::Days,
            }),
            ..Default::default()
        };
        let now = Utc::now();

        store
            .insert(finished_execution(wf, "u1", now - Duration::hours(12)))
            .unwrap();
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::InCooldown)
        );
        // Outside the window the cooldown clears.
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now + Duration::days(3)),
            None
        );
    }

    #[test]
    fn test_frequency_caps_count_stored_sends() {
        let (store, limiter) = setup();
        let wf = Uuid::new_v4();
        let settings = WorkflowSettings {
            frequency_capping: Some(FrequencyCaps {
                max_per_day: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let now = Utc::now();

        store
            .insert(execution_with_sends(wf, "u1", vec![now - Duration::hours(1)]))
            .unwrap();
        assert_eq!(limiter.deny_reason(&wf, "u1", &settings, now), None);

        store
            .insert(execution_with_sends(wf, "u1", vec![now - Duration::hours(2)]))
            .unwrap();
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::FrequencyCapped(CapWindow::Day))
        );

        // Sends older than the window do not count.
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now + Duration::days(2)),
            None
        );
    }

    #[test]
    fn test_caps_survive_limiter_restart() {
        let store: Arc<InMemoryExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let wf = Uuid::new_v4();
        let now = Utc::now();
        let settings = WorkflowSettings {
            frequency_capping: Some(FrequencyCaps {
                max_per_day: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };

        store
            .insert(execution_with_sends(wf, "u1", vec![now - Duration::hours(3)]))
            .unwrap();

        // A freshly constructed limiter sees the history because it lives
        // on the execution records, not in the limiter.
        let rebuilt = ExecutionLimiter::new(store.clone());
        assert_eq!(
            rebuilt.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::FrequencyCapped(CapWindow::Day))
        );
    }

    #[test]
    fn test_check_order_concurrency_before_caps() {
        let (store, limiter) = setup();
        let wf = Uuid::new_v4();
        let settings = WorkflowSettings {
            max_executions_per_user: Some(1),
            ..Default::default()
        };
        let now = Utc::now();

        store
            .insert(Execution::new(wf, "u1", json!({}), serde_json::Map::new()))
            .unwrap();
        // Active execution also counts toward the lifetime cap, but the
        // concurrency check reports first.
        assert_eq!(
            limiter.deny_reason(&wf, "u1", &settings, now),
            Some(DenyReason::AlreadyActive)
        );
    }
}
