//! Workflow lifecycle and execution orchestration.
//!
//! The coordinator owns the workflow registry and is the sole writer of
//! execution records and stats counters. Per run it works against a
//! cloned workflow snapshot, so definition edits never affect an
//! in-flight pass through the step loop.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courseflow_audience::AudienceMatcher;
use courseflow_core::event_bus::{make_event, noop_sink, EventSink};
use courseflow_core::types::EventType;
use courseflow_core::{FlowError, FlowResult};

use crate::condition;
use crate::cron;
use crate::executor::{StepDisposition, StepExecutor, StepOutcome, StepReport, UserStore};
use crate::limiter::ExecutionLimiter;
use crate::scheduler::Scheduler;
use crate::store::{finish, ExecutionStore};
use crate::types::{
    Execution, ExecutionStatus, StepConfig, TriggerConfig, Workflow, WorkflowStatus,
};

const DEFAULT_MAX_STEPS_PER_RUN: usize = 100;

pub struct WorkflowCoordinator {
    workflows: DashMap<Uuid, Workflow>,
    store: Arc<dyn ExecutionStore>,
    scheduler: Arc<dyn Scheduler>,
    limiter: ExecutionLimiter,
    matcher: AudienceMatcher,
    executor: StepExecutor,
    users: Arc<dyn UserStore>,
    event_sink: Arc<dyn EventSink>,
    max_steps_per_run: usize,
}

impl WorkflowCoordinator {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        scheduler: Arc<dyn Scheduler>,
        executor: StepExecutor,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            workflows: DashMap::new(),
            limiter: ExecutionLimiter::new(store.clone()),
            store,
            scheduler,
            matcher: AudienceMatcher::new(),
            executor,
            users,
            event_sink: noop_sink(),
            max_steps_per_run: DEFAULT_MAX_STEPS_PER_RUN,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_max_steps_per_run(mut self, max: usize) -> Self {
        self.max_steps_per_run = max.max(1);
        self
    }

    // ─── Workflow lifecycle ─────────────────────────────────────────────

    /// Register a new definition. Always enters as a draft regardless of
    /// the status on the submitted value.
    pub fn create_workflow(&self, mut workflow: Workflow) -> FlowResult<Uuid> {
        workflow.status = WorkflowStatus::Draft;
        workflow.updated_at = Utc::now();
        let id = workflow.id;
        info!(workflow_id = %id, name = %workflow.name, "workflow created");
        self.workflows.insert(id, workflow);
        Ok(id)
    }

    pub fn get_workflow(&self, id: &Uuid) -> Option<Workflow> {
        self.workflows.get(id).map(|w| w.clone())
    }

    pub fn list_workflows(&self) -> Vec<Workflow> {
        self.workflows.iter().map(|w| w.clone()).collect()
    }

    /// Validate and activate. Branch targets are resolved here, once;
    /// schedule triggers get their first fire time armed.
    pub fn activate(&self, id: &Uuid) -> FlowResult<()> {
        let mut entry = self
            .workflows
            .get_mut(id)
            .ok_or(FlowError::WorkflowNotFound(*id))?;
        let workflow = entry.value_mut();

        if workflow.status == WorkflowStatus::Archived {
            return Err(FlowError::Validation(format!(
                "workflow {id} is archived and cannot be activated"
            )));
        }
        workflow.validate_for_activation()?;

        if let TriggerConfig::Schedule { cron, next_fire_at } = &mut workflow.trigger {
            *next_fire_at = cron::next_fire(cron, Utc::now());
            if next_fire_at.is_none() {
                return Err(FlowError::Validation(format!(
                    "schedule trigger expression '{cron}' never fires"
                )));
            }
        }

        workflow.status = WorkflowStatus::Active;
        workflow.updated_at = Utc::now();
        info!(workflow_id = %id, "workflow activated");
        Ok(())
    }

    /// Stop accepting new triggers. In-flight executions are untouched.
    pub fn pause(&self, id: &Uuid) -> FlowResult<()> {
        let mut entry = self
            .workflows
            .get_mut(id)
            .ok_or(FlowError::WorkflowNotFound(*id))?;
        if entry.status != WorkflowStatus::Active {
            return Err(FlowError::Validation(format!(
                "workflow {id} is not active"
            )));
        }
        entry.status = WorkflowStatus::Paused;
        entry.updated_at = Utc::now();
        info!(workflow_id = %id, "workflow paused");
        Ok(())
    }

    pub fn reactivate(&self, id: &Uuid) -> FlowResult<()> {
        {
            let entry = self.workflows.get(id).ok_or(FlowError::WorkflowNotFound(*id))?;
            if entry.status != WorkflowStatus::Paused {
                return Err(FlowError::Validation(format!(
                    "workflow {id} is not paused"
                )));
            }
        }
        self.activate(id)
    }

    /// Retire the workflow and cancel every suspended execution. Running
    /// passes observe their own snapshot and finish their current step.
    pub fn archive(&self, id: &Uuid) -> FlowResult<()> {
        {
            let mut entry = self
                .workflows
                .get_mut(id)
                .ok_or(FlowError::WorkflowNotFound(*id))?;
            entry.status = WorkflowStatus::Archived;
            entry.updated_at = Utc::now();
        }
        // Guard dropped before sweeping so resume callbacks cannot deadlock.

        let waiting = self.store.waiting_for_workflow(id);
        let cancelled = waiting.len();
        for execution in waiting {
            if let Err(err) = self.scheduler.cancel(&execution.id) {
                warn!(execution_id = %execution.id, error = %err, "timer cancel failed");
            }
            let result = self.store.update(&execution.id, &mut |e| {
                finish(
                    e,
                    ExecutionStatus::Failed,
                    Some("workflow archived".to_string()),
                );
            });
            match result {
                Ok(_) => {
                    self.bump_stats(id, |s| s.failed_executions += 1);
                    self.event_sink.emit(make_event(
                        EventType::ExecutionCancelled,
                        Some(*id),
                        Some(execution.id),
                        Some(execution.user_id.clone()),
                    ));
                }
                Err(err) => {
                    warn!(execution_id = %execution.id, error = %err, "cancel failed")
                }
            }
        }
        info!(workflow_id = %id, cancelled, "workflow archived");
        Ok(())
    }

    // ─── Triggering ─────────────────────────────────────────────────────

    /// Attempt to start an execution for one user. `Ok(None)` means the
    /// trigger was evaluated and rejected, which is not an error.
    pub fn trigger(
        &self,
        workflow_id: &Uuid,
        user_id: &str,
        trigger_data: Value,
    ) -> FlowResult<Option<Uuid>> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .map(|w| w.clone())
            .ok_or(FlowError::WorkflowNotFound(*workflow_id))?;

        let now = Utc::now();
        let rejection = self.rejection_reason(&workflow, user_id, now);
        if let Some(reason) = rejection {
            debug!(
                workflow_id = %workflow_id,
                user_id = %user_id,
                reason = %reason,
                "trigger rejected"
            );
            let mut event = make_event(
                EventType::TriggerRejected,
                Some(*workflow_id),
                None,
                Some(user_id.to_string()),
            );
            event.detail = Some(json!({ "reason": reason }));
            self.event_sink.emit(event);
            return Ok(None);
        }

        let mut variables = serde_json::Map::new();
        if let Some(profile) = self.users.get_user(user_id) {
            for (key, value) in &profile.attributes {
                variables.insert(key.clone(), value.clone());
            }
        }
        if let Value::Object(fields) = &trigger_data {
            for (key, value) in fields {
                variables.insert(key.clone(), value.clone());
            }
        }
        variables.insert("user_id".to_string(), Value::String(user_id.to_string()));

        let execution = Execution::new(*workflow_id, user_id, trigger_data, variables);
        let execution_id = execution.id;
        self.store.insert(execution.clone())?;
        self.bump_stats(workflow_id, |s| s.total_executions += 1);
        metrics::counter!("courseflow.executions_started").increment(1);

        info!(
            workflow_id = %workflow_id,
            execution_id = %execution_id,
            user_id = %user_id,
            "execution started"
        );
        self.event_sink.emit(make_event(
            EventType::ExecutionStarted,
            Some(*workflow_id),
            Some(execution_id),
            Some(user_id.to_string()),
        ));

        self.run_execution(&workflow, execution)?;
        Ok(Some(execution_id))
    }

    fn rejection_reason(
        &self,
        workflow: &Workflow,
        user_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Option<String> {
        if workflow.status != WorkflowStatus::Active {
            return Some(format!("workflow is {:?}", workflow.status).to_lowercase());
        }
        if let Some(from) = workflow.active_from {
            if now < from {
                return Some("before activation window".to_string());
            }
        }
        if let Some(until) = workflow.active_until {
            if now > until {
                return Some("after activation window".to_string());
            }
        }
        let Some(profile) = self.users.get_user(user_id) else {
            return Some("unknown user".to_string());
        };
        if !self.matcher.matches(&profile, &workflow.audience) {
            return Some("outside target audience".to_string());
        }
        if let Some(deny) = self
            .limiter
            .deny_reason(&workflow.id, user_id, &workflow.settings, now)
        {
            return Some(format!("{deny:?}").to_lowercase());
        }
        None
    }

    // ─── Schedule triggers ──────────────────────────────────────────────

    /// Fire every active schedule-trigger workflow whose next fire time
    /// has passed, triggering each of the given users. The next fire time
    /// is advanced before any user is triggered, so a slow pass cannot
    /// double-fire.
    pub fn fire_due_schedules(&self, now: chrono::DateTime<Utc>, user_ids: &[String]) {
        let mut due: Vec<Uuid> = Vec::new();
        for entry in self.workflows.iter() {
            if entry.status != WorkflowStatus::Active {
                continue;
            }
            if let TriggerConfig::Schedule {
                next_fire_at: Some(at),
                ..
            } = &entry.trigger
            {
                if *at <= now {
                    due.push(entry.id);
                }
            }
        }

        for workflow_id in due {
            if let Some(mut entry) = self.workflows.get_mut(&workflow_id) {
                if let TriggerConfig::Schedule { cron, next_fire_at } = &mut entry.trigger {
                    *next_fire_at = cron::next_fire(cron, now);
                }
            }
            for user_id in user_ids {
                if let Err(err) = self.trigger(&workflow_id, user_id, json!({})) {
                    warn!(
                        workflow_id = %workflow_id,
                        user_id = %user_id,
                        error = %err,
                        "scheduled trigger failed"
                    );
                }
            }
        }
    }

    // ─── Resume ─────────────────────────────────────────────────────────

    /// Wake a suspended execution. Unknown, terminal, or not-waiting
    /// executions are ignored, so duplicate timer fires are harmless.
    pub fn resume(&self, execution_id: &Uuid) -> FlowResult<()> {
        let Some(execution) = self.store.get(execution_id) else {
            debug!(execution_id = %execution_id, "resume for unknown execution ignored");
            return Ok(());
        };
        if execution.status != ExecutionStatus::Waiting {
            debug!(
                execution_id = %execution_id,
                status = ?execution.status,
                "resume ignored"
            );
            return Ok(());
        }

        let workflow = self
            .workflows
            .get(&execution.workflow_id)
            .map(|w| w.clone())
            .ok_or(FlowError::WorkflowNotFound(execution.workflow_id))?;

        let execution = self.store.update(execution_id, &mut |e| {
            e.status = ExecutionStatus::Running;
            e.resume_at = None;
        })?;
        debug!(execution_id = %execution_id, "execution resumed");
        self.run_execution(&workflow, execution)
    }

    // ─── Step loop ──────────────────────────────────────────────────────

    fn run_execution(&self, workflow: &Workflow, mut execution: Execution) -> FlowResult<()> {
        if execution.status == ExecutionStatus::Pending {
            execution.status = ExecutionStatus::Running;
            self.persist(&execution)?;
        }

        for _ in 0..self.max_steps_per_run {
            if execution.current_step_index == workflow.steps.len() {
                return self.complete(workflow, execution, None);
            }
            if execution.current_step_index > workflow.steps.len() {
                // Stale index, e.g. resumed against a shrunken definition.
                // Fail closed rather than misroute.
                let index = execution.current_step_index;
                return self.fail(
                    workflow,
                    execution,
                    format!("step index {index} out of range"),
                );
            }

            if !workflow.settings.exit_conditions.is_empty()
                && condition::evaluate_all(
                    &workflow.settings.exit_conditions,
                    crate::condition::ConditionLogic::And,
                    &execution.variables,
                )
            {
                debug!(execution_id = %execution.id, "exit condition matched");
                return self.complete(workflow, execution, Some(json!({ "exit_matched": true })));
            }

            let step = &workflow.steps[execution.current_step_index];
            let report = match self.executor.run(workflow, &execution, step) {
                Ok(report) => report,
                Err(err) => {
                    self.record_step_stats(workflow, step.id, &StepDisposition::Failed(String::new()));
                    return self.fail(workflow, execution, err.to_string());
                }
            };

            self.apply_report(workflow, &mut execution, step.id, &report)?;

            let failed = matches!(report.disposition, StepDisposition::Failed(_));
            if failed && workflow.settings.fail_execution_on_step_failure {
                let reason = match report.disposition {
                    StepDisposition::Failed(reason) => reason,
                    _ => String::new(),
                };
                return self.fail(workflow, execution, reason);
            }

            match report.outcome {
                StepOutcome::Advance(next) => {
                    execution.current_step_index = next;
                    self.persist(&execution)?;
                }
                StepOutcome::Wait(resume_at) => {
                    execution.status = ExecutionStatus::Waiting;
                    execution.resume_at = Some(resume_at);
                    execution.current_step_index += 1;
                    // Durable state first; a timer without state is
                    // harmless, state without a timer is re-armable.
                    self.persist(&execution)?;
                    if let Err(err) = self.scheduler.schedule_at(execution.id, resume_at) {
                        return self.fail(workflow, execution, err.to_string());
                    }
                    return Ok(());
                }
                StepOutcome::Terminate { success } => {
                    return if success {
                        self.complete(workflow, execution, None)
                    } else {
                        self.fail(workflow, execution, "terminated".to_string())
                    };
                }
            }
        }

        warn!(
            execution_id = %execution.id,
            max_steps = self.max_steps_per_run,
            "step budget exhausted"
        );
        self.fail(workflow, execution, "step budget exhausted".to_string())
    }

    fn apply_report(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        step_id: Uuid,
        report: &StepReport,
    ) -> FlowResult<()> {
        for (key, value) in &report.set_variables {
            execution.variables.insert(key.clone(), value.clone());
        }
        self.record_step_stats(workflow, step_id, &report.disposition);
        match &report.disposition {
            StepDisposition::Completed => {
                let mut event = make_event(
                    EventType::StepExecuted,
                    Some(workflow.id),
                    Some(execution.id),
                    Some(execution.user_id.clone()),
                );
                event.step_id = Some(step_id);
                self.event_sink.emit(event);
            }
            StepDisposition::Failed(reason) => {
                let mut event = make_event(
                    EventType::StepFailed,
                    Some(workflow.id),
                    Some(execution.id),
                    Some(execution.user_id.clone()),
                );
                event.step_id = Some(step_id);
                event.detail = Some(json!({ "reason": reason }));
                self.event_sink.emit(event);
            }
            StepDisposition::Skipped => {}
        }
        if report.email_sent {
            // On the record, not in the limiter: caps must survive restarts.
            execution.email_sends.push(Utc::now());
        }
        Ok(())
    }

    /// Bump per-step counters exactly once per attempt. Skipped steps are
    /// not counted as executed.
    fn record_step_stats(&self, workflow: &Workflow, step_id: Uuid, disposition: &StepDisposition) {
        if matches!(disposition, StepDisposition::Skipped) {
            return;
        }
        let Some(mut entry) = self.workflows.get_mut(&workflow.id) else {
            return;
        };
        let Some(index) = entry.step_index.get(&step_id).copied() else {
            return;
        };
        let is_goal = matches!(entry.steps[index].config, StepConfig::Goal { .. });
        let stats = &mut entry.steps[index].stats;
        stats.execution_count += 1;
        match disposition {
            StepDisposition::Completed => {
                stats.success_count += 1;
                if is_goal {
                    stats.conversion_count += 1;
                }
            }
            StepDisposition::Failed(_) => stats.failure_count += 1,
            StepDisposition::Skipped => {}
        }
    }

    fn complete(
        &self,
        workflow: &Workflow,
        execution: Execution,
        detail: Option<Value>,
    ) -> FlowResult<()> {
        let execution = self.store.update(&execution.id, &mut |e| {
            // Carry this pass's variable, send, and position changes through.
            e.variables = execution.variables.clone();
            e.email_sends = execution.email_sends.clone();
            e.current_step_index = execution.current_step_index;
            finish(e, ExecutionStatus::Completed, None);
        })?;
        self.bump_stats(&workflow.id, |s| s.successful_executions += 1);
        metrics::counter!("courseflow.executions_completed").increment(1);
        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "execution completed"
        );
        let mut event = make_event(
            EventType::ExecutionCompleted,
            Some(workflow.id),
            Some(execution.id),
            Some(execution.user_id.clone()),
        );
        event.detail = detail;
        self.event_sink.emit(event);
        Ok(())
    }

    fn fail(&self, workflow: &Workflow, execution: Execution, reason: String) -> FlowResult<()> {
        let execution = self.store.update(&execution.id, &mut |e| {
            e.variables = execution.variables.clone();
            e.email_sends = execution.email_sends.clone();
            e.current_step_index = execution.current_step_index;
            finish(e, ExecutionStatus::Failed, Some(reason.clone()));
        })?;
        self.bump_stats(&workflow.id, |s| s.failed_executions += 1);
        metrics::counter!("courseflow.executions_failed").increment(1);
        warn!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            reason = %reason,
            "execution failed"
        );
        let mut event = make_event(
            EventType::ExecutionFailed,
            Some(workflow.id),
            Some(execution.id),
            Some(execution.user_id.clone()),
        );
        event.detail = Some(json!({ "reason": reason }));
        self.event_sink.emit(event);
        Ok(())
    }

    fn persist(&self, execution: &Execution) -> FlowResult<()> {
        self.store.update(&execution.id, &mut |e| {
            *e = execution.clone();
        })?;
        Ok(())
    }

    fn bump_stats(&self, workflow_id: &Uuid, apply: impl Fn(&mut crate::types::WorkflowStats)) {
        if let Some(mut entry) = self.workflows.get_mut(workflow_id) {
            apply(&mut entry.stats);
        }
    }
}
