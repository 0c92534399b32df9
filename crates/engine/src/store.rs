//! Durable execution state.
//!
//! The store is the source of truth for suspend/resume: every state
//! change is written through before any follow-up work is scheduled, so
//! an execution can always be reconstructed from the store alone.

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use courseflow_core::{FlowError, FlowResult};

use crate::types::{Execution, ExecutionStatus};

/// Persistence seam for execution records.
pub trait ExecutionStore: Send + Sync {
    fn insert(&self, execution: Execution) -> FlowResult<()>;

    fn get(&self, id: &Uuid) -> Option<Execution>;

    /// Apply a mutation to the stored record and return the updated copy.
    fn update(
        &self,
        id: &Uuid,
        mutate: &mut dyn FnMut(&mut Execution),
    ) -> FlowResult<Execution>;

    /// All executions of a workflow for one user, any status.
    fn executions_for(&self, workflow_id: &Uuid, user_id: &str) -> Vec<Execution>;

    /// The non-terminal execution of a workflow for one user, if any.
    fn active_execution(&self, workflow_id: &Uuid, user_id: &str) -> Option<Execution>;

    /// All executions of a workflow currently suspended on a timer.
    fn waiting_for_workflow(&self, workflow_id: &Uuid) -> Vec<Execution>;
}

/// DashMap-backed store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: DashMap<Uuid, Execution>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn insert(&self, execution: Execution) -> FlowResult<()> {
        if self.executions.contains_key(&execution.id) {
            return Err(FlowError::Storage(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Option<Execution> {
        self.executions.get(id).map(|e| e.clone())
    }

    fn update(
        &self,
        id: &Uuid,
        mutate: &mut dyn FnMut(&mut Execution),
    ) -> FlowResult<Execution> {
        let mut entry = self
            .executions
            .get_mut(id)
            .ok_or(FlowError::ExecutionNotFound(*id))?;
        mutate(entry.value_mut());
        Ok(entry.clone())
    }

    fn executions_for(&self, workflow_id: &Uuid, user_id: &str) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|e| e.workflow_id == *workflow_id && e.user_id == user_id)
            .map(|e| e.clone())
            .collect()
    }

    fn active_execution(&self, workflow_id: &Uuid, user_id: &str) -> Option<Execution> {
        self.executions
            .iter()
            .find(|e| {
                e.workflow_id == *workflow_id && e.user_id == user_id && !e.is_terminal()
            })
            .map(|e| e.clone())
    }

    fn waiting_for_workflow(&self, workflow_id: &Uuid) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|e| e.workflow_id == *workflow_id && e.status == ExecutionStatus::Waiting)
            .map(|e| e.clone())
            .collect()
    }
}

/// Mark an execution terminal with a completion timestamp.
pub(crate) fn finish(execution: &mut Execution, status: ExecutionStatus, reason: Option<String>) {
    execution.status = status;
    execution.finished_at = Some(Utc::now());
    execution.resume_at = None;
    execution.failure_reason = reason;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution(workflow_id: Uuid, user_id: &str) -> Execution {
        Execution::new(workflow_id, user_id, json!({}), serde_json::Map::new())
    }

    #[test]
    fn test_insert_and_get() {
        let store = InMemoryExecutionStore::new();
        let wf = Uuid::new_v4();
        let e = execution(wf, "u1");
        let id = e.id;
        store.insert(e).unwrap();
        assert_eq!(store.get(&id).unwrap().user_id, "u1");
        assert!(store.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let store = InMemoryExecutionStore::new();
        let e = execution(Uuid::new_v4(), "u1");
        store.insert(e.clone()).unwrap();
        assert!(store.insert(e).is_err());
    }

    #[test]
    fn test_update_returns_mutated_copy() {
        let store = InMemoryExecutionStore::new();
        let e = execution(Uuid::new_v4(), "u1");
        let id = e.id;
        store.insert(e).unwrap();

        let updated = store
            .update(&id, &mut |e| {
                e.status = ExecutionStatus::Running;
                e.current_step_index = 3;
            })
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Running);
        assert_eq!(store.get(&id).unwrap().current_step_index, 3);

        assert!(store.update(&Uuid::new_v4(), &mut |_| {}).is_err());
    }

    #[test]
    fn test_active_execution_ignores_terminal() {
        let store = InMemoryExecutionStore::new();
        let wf = Uuid::new_v4();

        let mut done = execution(wf, "u1");
        done.status = ExecutionStatus::Completed;
        store.insert(done).unwrap();
        assert!(store.active_execution(&wf, "u1").is_none());

        let live = execution(wf, "u1");
        let live_id = live.id;
        store.insert(live).unwrap();
        assert_eq!(store.active_execution(&wf, "u1").unwrap().id, live_id);
        assert!(store.active_execution(&wf, "u2").is_none());
    }

    #[test]
    fn test_waiting_for_workflow() {
        let store = InMemoryExecutionStore::new();
        let wf = Uuid::new_v4();

        let mut waiting = execution(wf, "u1");
        waiting.status = ExecutionStatus::Waiting;
        let waiting_id = waiting.id;
        store.insert(waiting).unwrap();
        store.insert(execution(wf, "u2")).unwrap();
        store.insert(execution(Uuid::new_v4(), "u1")).unwrap();

        let found = store.waiting_for_workflow(&wf);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, waiting_id);
    }
}
