//! Single-step execution.
//!
//! The executor runs exactly one step against an execution snapshot and
//! reports what happened; it never mutates workflow or execution state.
//! The coordinator owns persistence, stats, and the advance/suspend loop.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use courseflow_core::event_bus::{make_event, noop_sink, EventSink};
use courseflow_core::templates::TemplateRenderer;
use courseflow_core::types::{EventType, UserProfile};
use courseflow_core::FlowResult;
use courseflow_delivery::{
    BusinessHours, DeliveryProvider, OutboundEmail, SuppressionChecker, SuppressionScope,
};

use crate::condition;
use crate::types::{ActionType, Execution, StepConfig, Workflow, WorkflowStep};

/// Where the execution goes after this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Continue synchronously at the given step index.
    Advance(usize),
    /// Suspend until the given instant, then continue at the index the
    /// coordinator recorded.
    Wait(chrono::DateTime<Utc>),
    /// End the execution.
    Terminate { success: bool },
}

/// How the step attempt itself went, independent of where the execution
/// goes next. Skipped steps are not counted as executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDisposition {
    Completed,
    Failed(String),
    Skipped,
}

/// Everything the coordinator needs to apply one step attempt.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub disposition: StepDisposition,
    pub set_variables: Vec<(String, Value)>,
    pub email_sent: bool,
}

impl StepReport {
    fn advance(disposition: StepDisposition, next: usize) -> Self {
        Self {
            outcome: StepOutcome::Advance(next),
            disposition,
            set_variables: Vec::new(),
            email_sent: false,
        }
    }
}

/// Lookup seam for user profiles at execution time.
pub trait UserStore: Send + Sync {
    fn get_user(&self, user_id: &str) -> Option<UserProfile>;
}

/// Side-effect seam for Action steps. One handler per action variant.
pub trait ActionGateway: Send + Sync {
    fn add_tag(&self, user_id: &str, tag: &str) -> anyhow::Result<()>;
    fn remove_tag(&self, user_id: &str, tag: &str) -> anyhow::Result<()>;
    fn update_field(&self, user_id: &str, field: &str, value: &Value) -> anyhow::Result<()>;
    fn call_webhook(&self, user_id: &str, url: &str, payload: &Value) -> anyhow::Result<()>;
    fn enroll(&self, user_id: &str, course_id: &str) -> anyhow::Result<()>;
    fn unenroll(&self, user_id: &str, course_id: &str) -> anyhow::Result<()>;
}

pub struct StepExecutor {
    renderer: Arc<TemplateRenderer>,
    delivery: Arc<dyn DeliveryProvider>,
    suppression: Arc<dyn SuppressionChecker>,
    users: Arc<dyn UserStore>,
    actions: Arc<dyn ActionGateway>,
    event_sink: Arc<dyn EventSink>,
    from_email: String,
    from_name: String,
    business_hours: BusinessHours,
}

impl StepExecutor {
    pub fn new(
        renderer: Arc<TemplateRenderer>,
        delivery: Arc<dyn DeliveryProvider>,
        suppression: Arc<dyn SuppressionChecker>,
        users: Arc<dyn UserStore>,
        actions: Arc<dyn ActionGateway>,
    ) -> Self {
        Self {
            renderer,
            delivery,
            suppression,
            users,
            actions,
            event_sink: noop_sink(),
            from_email: "noreply@courseflow.dev".into(),
            from_name: "CourseFlow".into(),
            business_hours: BusinessHours::default(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_sender(mut self, from_email: impl Into<String>, from_name: impl Into<String>) -> Self {
        self.from_email = from_email.into();
        self.from_name = from_name.into();
        self
    }

    pub fn with_business_hours(mut self, hours: BusinessHours) -> Self {
        self.business_hours = hours;
        self
    }

    /// Run one step. The only error path is branch resolution against the
    /// workflow's step index; every delivery or action failure is reported
    /// in the disposition instead.
    pub fn run(
        &self,
        workflow: &Workflow,
        execution: &Execution,
        step: &WorkflowStep,
    ) -> FlowResult<StepReport> {
        let next = execution.current_step_index + 1;

        if !condition::evaluate_all(
            &step.execution_conditions,
            step.condition_logic,
            &execution.variables,
        ) {
            debug!(
                execution_id = %execution.id,
                step_id = %step.id,
                "step gate unmet, skipping"
            );
            self.emit_step(EventType::StepSkipped, workflow, execution, step, None);
            return Ok(StepReport::advance(StepDisposition::Skipped, next));
        }

        match &step.config {
            StepConfig::Email {
                template_id,
                goal_event,
            } => Ok(self.run_email(workflow, execution, step, template_id, goal_event.as_deref(), next)),
            StepConfig::Delay { amount, unit } => {
                let mut resume_at = Utc::now() + unit.to_duration(*amount);
                if workflow.settings.business_hours_only {
                    let tz_offset = if workflow.settings.respect_user_timezone {
                        self.users
                            .get_user(&execution.user_id)
                            .and_then(|u| u.timezone_offset_minutes)
                            .unwrap_or(0)
                    } else {
                        0
                    };
                    resume_at = self.business_hours.next_open(resume_at, tz_offset);
                }
                self.emit_step(
                    EventType::DelayScheduled,
                    workflow,
                    execution,
                    step,
                    Some(json!({ "resume_at": resume_at.to_rfc3339() })),
                );
                Ok(StepReport {
                    outcome: StepOutcome::Wait(resume_at),
                    disposition: StepDisposition::Completed,
                    set_variables: Vec::new(),
                    email_sent: false,
                })
            }
            StepConfig::Condition {
                condition: cond,
                true_step,
                false_step,
            } => {
                let branch = if condition::evaluate(cond, &execution.variables) {
                    true_step
                } else {
                    false_step
                };
                let target = match branch {
                    Some(step_id) => workflow.resolve_step(step_id)?,
                    None => next,
                };
                Ok(StepReport::advance(StepDisposition::Completed, target))
            }
            StepConfig::Action { action } => Ok(self.run_action(workflow, execution, step, action, next)),
            StepConfig::SplitTest { variants } => {
                self.run_split(workflow, execution, step, variants, next)
            }
            StepConfig::Goal { name, .. } => {
                self.emit_step(
                    EventType::GoalConverted,
                    workflow,
                    execution,
                    step,
                    Some(json!({ "goal": name })),
                );
                Ok(StepReport {
                    outcome: StepOutcome::Terminate { success: true },
                    disposition: StepDisposition::Completed,
                    set_variables: Vec::new(),
                    email_sent: false,
                })
            }
        }
    }

    fn run_email(
        &self,
        workflow: &Workflow,
        execution: &Execution,
        step: &WorkflowStep,
        template_id: &uuid::Uuid,
        goal_event: Option<&str>,
        next: usize,
    ) -> StepReport {
        let Some(profile) = self.users.get_user(&execution.user_id) else {
            return StepReport::advance(
                StepDisposition::Failed(format!("unknown user {}", execution.user_id)),
                next,
            );
        };
        let Some(address) = profile.email.as_deref().filter(|a| !a.is_empty()) else {
            return StepReport::advance(
                StepDisposition::Failed(format!("user {} has no email address", execution.user_id)),
                next,
            );
        };

        if self.suppression.is_suppressed(address, SuppressionScope::Email) {
            debug!(
                execution_id = %execution.id,
                user_id = %execution.user_id,
                "recipient suppressed, send withheld"
            );
            self.emit_step(EventType::EmailSuppressed, workflow, execution, step, None);
            return StepReport::advance(StepDisposition::Completed, next);
        }

        let Some(rendered) = self.renderer.render(template_id, &execution.variables) else {
            return StepReport::advance(
                StepDisposition::Failed(format!("template {template_id} missing or inactive")),
                next,
            );
        };

        let email = OutboundEmail {
            to: address.to_string(),
            from_email: self.from_email.clone(),
            from_name: self.from_name.clone(),
            subject: rendered.subject,
            body: rendered.body,
            html_body: rendered.html_body,
            workflow_id: Some(workflow.id),
            execution_id: Some(execution.id),
        };
        let receipt = self.delivery.send(&email);

        if receipt.success {
            let mut detail = serde_json::Map::new();
            if let Some(id) = receipt.provider_message_id {
                detail.insert("provider_message_id".into(), json!(id));
            }
            if let Some(goal) = goal_event {
                detail.insert("goal_event".into(), json!(goal));
            }
            self.emit_step(EventType::EmailSent, workflow, execution, step, Some(detail.into()));
            StepReport {
                outcome: StepOutcome::Advance(next),
                disposition: StepDisposition::Completed,
                set_variables: Vec::new(),
                email_sent: true,
            }
        } else {
            let reason = receipt.error.unwrap_or_else(|| "delivery failed".into());
            warn!(
                execution_id = %execution.id,
                step_id = %step.id,
                error = %reason,
                "email delivery failed"
            );
            StepReport::advance(StepDisposition::Failed(reason), next)
        }
    }

    fn run_action(
        &self,
        workflow: &Workflow,
        execution: &Execution,
        step: &WorkflowStep,
        action: &ActionType,
        next: usize,
    ) -> StepReport {
        let user_id = execution.user_id.as_str();
        let result = match action {
            ActionType::AddTag { tag } => self.actions.add_tag(user_id, tag),
            ActionType::RemoveTag { tag } => self.actions.remove_tag(user_id, tag),
            ActionType::UpdateField { field, value } => {
                self.actions.update_field(user_id, field, value)
            }
            ActionType::CallWebhook { url } => {
                self.actions.call_webhook(user_id, url, &execution.trigger_data)
            }
            ActionType::EnrollCourse { course_id } => self.actions.enroll(user_id, course_id),
            ActionType::UnenrollCourse { course_id } => self.actions.unenroll(user_id, course_id),
        };

        match result {
            Ok(()) => {
                self.emit_step(EventType::ActionPerformed, workflow, execution, step, None);
                StepReport::advance(StepDisposition::Completed, next)
            }
            Err(err) => {
                warn!(
                    execution_id = %execution.id,
                    step_id = %step.id,
                    error = %err,
                    "action failed"
                );
                StepReport::advance(StepDisposition::Failed(err.to_string()), next)
            }
        }
    }

    fn run_split(
        &self,
        workflow: &Workflow,
        execution: &Execution,
        step: &WorkflowStep,
        variants: &[crate::types::SplitVariant],
        next: usize,
    ) -> FlowResult<StepReport> {
        // Deterministic bucket from the execution id so the same
        // execution always lands on the same variant.
        let bucket = bucket_of(execution.id.as_bytes());
        let mut cumulative = 0u32;
        for variant in variants {
            cumulative += u32::from(variant.weight_pct);
            if u32::from(bucket) < cumulative {
                let target = workflow.resolve_step(&variant.entry_step)?;
                self.emit_step(
                    EventType::VariantAssigned,
                    workflow,
                    execution,
                    step,
                    Some(json!({ "variant": variant.name })),
                );
                return Ok(StepReport {
                    outcome: StepOutcome::Advance(target),
                    disposition: StepDisposition::Completed,
                    set_variables: vec![(
                        "split_variant".to_string(),
                        Value::String(variant.name.clone()),
                    )],
                    email_sent: false,
                });
            }
        }
        // Remainder bucket: no variant assigned, fall through in sequence.
        Ok(StepReport::advance(StepDisposition::Completed, next))
    }

    fn emit_step(
        &self,
        event_type: EventType,
        workflow: &Workflow,
        execution: &Execution,
        step: &WorkflowStep,
        detail: Option<Value>,
    ) {
        let mut event = make_event(
            event_type,
            Some(workflow.id),
            Some(execution.id),
            Some(execution.user_id.clone()),
        );
        event.step_id = Some(step.id);
        event.detail = detail;
        self.event_sink.emit(event);
    }
}

/// Stable 0..100 bucket from an id's bytes.
fn bucket_of(bytes: &[u8]) -> u8 {
    let hash = bytes
        .iter()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(*b)));
    (hash % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_bucket_is_stable_and_bounded() {
        let id = Uuid::new_v4();
        let first = bucket_of(id.as_bytes());
        assert_eq!(first, bucket_of(id.as_bytes()));
        assert!(first < 100);
    }

    #[test]
    fn test_bucket_spreads_across_ids() {
        let buckets: std::collections::HashSet<u8> = (0..200)
            .map(|_| bucket_of(Uuid::new_v4().as_bytes()))
            .collect();
        // 200 random ids should land in many distinct buckets.
        assert!(buckets.len() > 20);
    }
}
