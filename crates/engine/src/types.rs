//! Workflow, step, and execution data model.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use courseflow_audience::TargetAudience;
use courseflow_core::{FlowError, FlowResult};

use crate::condition::{Condition, ConditionLogic};

/// A reusable workflow definition describing a multi-step automated
/// email sequence. Not tied to any single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub audience: TargetAudience,
    #[serde(default)]
    pub settings: WorkflowSettings,
    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
    pub steps: Vec<WorkflowStep>,
    /// Step id -> index mapping, resolved once at activation so runtime
    /// branch resolution is a pure lookup.
    #[serde(default)]
    pub step_index: HashMap<Uuid, usize>,
    #[serde(default)]
    pub stats: WorkflowStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, description: impl Into<String>, trigger: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: WorkflowStatus::Draft,
            trigger,
            audience: TargetAudience::default(),
            settings: WorkflowSettings::default(),
            active_from: None,
            active_until: None,
            steps: Vec::new(),
            step_index: HashMap::new(),
            stats: WorkflowStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_at(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    /// Pure lookup against the activation-time index. A miss is a hard
    /// failure, never a fallthrough.
    pub fn resolve_step(&self, step_id: &Uuid) -> FlowResult<usize> {
        self.step_index.get(step_id).copied().ok_or_else(|| {
            FlowError::BranchResolution(format!(
                "step {} not present in workflow {}",
                step_id, self.id
            ))
        })
    }

    /// Structural validation run at activation time. Sorts steps by their
    /// order index, checks each step config for its type, resolves every
    /// branch/variant target, and builds `step_index`.
    pub fn validate_for_activation(&mut self) -> FlowResult<()> {
        if self.steps.is_empty() {
            return Err(FlowError::Validation(format!(
                "workflow {} has no steps",
                self.id
            )));
        }

        self.steps.sort_by_key(|s| s.order_index);
        for pair in self.steps.windows(2) {
            if pair[0].order_index == pair[1].order_index {
                return Err(FlowError::Validation(format!(
                    "duplicate step order index {}",
                    pair[0].order_index
                )));
            }
        }

        let index: HashMap<Uuid, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id, i))
            .collect();

        for step in &self.steps {
            match &step.config {
                StepConfig::Email { template_id, .. } => {
                    if template_id.is_nil() {
                        return Err(FlowError::Validation(format!(
                            "email step {} has no template",
                            step.id
                        )));
                    }
                }
                StepConfig::Delay { amount, .. } => {
                    if *amount == 0 {
                        return Err(FlowError::Validation(format!(
                            "delay step {} has zero duration",
                            step.id
                        )));
                    }
                }
                StepConfig::Condition {
                    condition,
                    true_step,
                    false_step,
                } => {
                    if condition.field.is_empty() {
                        return Err(FlowError::Validation(format!(
                            "condition step {} has an empty field",
                            step.id
                        )));
                    }
                    for target in [true_step, false_step].into_iter().flatten() {
                        if !index.contains_key(target) {
                            return Err(FlowError::Validation(format!(
                                "condition step {} references unknown step {}",
                                step.id, target
                            )));
                        }
                    }
                }
                StepConfig::Action { .. } => {}
                StepConfig::SplitTest { variants } => {
                    if variants.is_empty() {
                        return Err(FlowError::Validation(format!(
                            "split step {} has no variants",
                            step.id
                        )));
                    }
                    let total: u32 = variants.iter().map(|v| u32::from(v.weight_pct)).sum();
                    if total > 100 {
                        return Err(FlowError::Validation(format!(
                            "split step {} weights sum to {total}%",
                            step.id
                        )));
                    }
                    for variant in variants {
                        if !index.contains_key(&variant.entry_step) {
                            return Err(FlowError::Validation(format!(
                                "split step {} variant '{}' references unknown step {}",
                                step.id, variant.name, variant.entry_step
                            )));
                        }
                    }
                }
                StepConfig::Goal { name, .. } => {
                    if name.is_empty() {
                        return Err(FlowError::Validation(format!(
                            "goal step {} has no name",
                            step.id
                        )));
                    }
                }
            }
        }

        self.step_index = index;
        Ok(())
    }
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// What starts an execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerConfig {
    Registration,
    Enrollment {
        course_id: Option<String>,
        category: Option<String>,
    },
    Completion {
        course_id: Option<String>,
    },
    Inactivity {
        days: u32,
    },
    CustomEvent {
        name: String,
    },
    Behavior {
        event: String,
        threshold: u32,
    },
    /// Time-based trigger. `next_fire_at` is recomputed from the cron
    /// expression after each fire; there is no global periodic sweep.
    Schedule {
        cron: String,
        next_fire_at: Option<DateTime<Utc>>,
    },
}

/// Per-workflow execution policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub max_executions_per_user: Option<u32>,
    pub cooldown: Option<Cooldown>,
    pub frequency_capping: Option<FrequencyCaps>,
    #[serde(default)]
    pub business_hours_only: bool,
    #[serde(default)]
    pub respect_user_timezone: bool,
    /// Evaluated before each step; a match ends the execution.
    #[serde(default)]
    pub exit_conditions: Vec<Condition>,
    /// When set, any step failure fails the whole execution.
    #[serde(default)]
    pub fail_execution_on_step_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cooldown {
    pub amount: u32,
    pub unit: DelayUnit,
}

impl Cooldown {
    pub fn as_duration(&self) -> Duration {
        self.unit.to_duration(self.amount)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrequencyCaps {
    pub max_per_day: Option<u32>,
    pub max_per_week: Option<u32>,
    pub max_per_month: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl DelayUnit {
    pub fn to_duration(self, amount: u32) -> Duration {
        let amount = i64::from(amount);
        match self {
            DelayUnit::Minutes => Duration::minutes(amount),
            DelayUnit::Hours => Duration::hours(amount),
            DelayUnit::Days => Duration::days(amount),
            DelayUnit::Weeks => Duration::weeks(amount),
        }
    }
}

/// Aggregate workflow counters, monotonically incremented by the
/// coordinator, never decremented.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
}

/// One node of the workflow's directed step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    /// Position in the default (non-branching) sequence; unique within a
    /// workflow.
    pub order_index: u32,
    pub config: StepConfig,
    /// Gating predicates evaluated before the step runs; if unmet, the
    /// step is skipped without being counted as executed.
    #[serde(default)]
    pub execution_conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub stats: StepStats,
}

impl WorkflowStep {
    pub fn new(order_index: u32, config: StepConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_index,
            config,
            execution_conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            stats: StepStats::default(),
        }
    }
}

/// Tagged step configuration matching the step's type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepConfig {
    Email {
        template_id: Uuid,
        /// Event name that counts as a conversion for this email, if any.
        #[serde(default)]
        goal_event: Option<String>,
    },
    Delay {
        amount: u32,
        unit: DelayUnit,
    },
    Condition {
        condition: Condition,
        true_step: Option<Uuid>,
        false_step: Option<Uuid>,
    },
    Action {
        action: ActionType,
    },
    SplitTest {
        variants: Vec<SplitVariant>,
    },
    Goal {
        name: String,
        conversion_window_days: u32,
    },
}

/// Closed set of side-effecting operations an Action step can perform.
/// One gateway handler per variant; dispatch is an exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ActionType {
    AddTag { tag: String },
    RemoveTag { tag: String },
    UpdateField { field: String, value: Value },
    CallWebhook { url: String },
    EnrollCourse { course_id: String },
    UnenrollCourse { course_id: String },
}

/// A single variant in a split-test step. Weights are percentages
/// summing to at most 100; the remainder is "no variant".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitVariant {
    pub name: String,
    pub weight_pct: u8,
    pub entry_step: Uuid,
}

/// Append-only per-step counters, updated exactly once per attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StepStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub conversion_count: u64,
}

/// One user's traversal of one workflow's step graph, created by one
/// trigger. The durable state the engine must never lose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    /// Opaque event payload captured at trigger time.
    pub trigger_data: Value,
    /// Seeded from trigger data and user attributes, extended by Action
    /// steps, read by Condition steps and template rendering.
    pub variables: serde_json::Map<String, Value>,
    pub current_step_index: usize,
    pub status: ExecutionStatus,
    /// When each email of this execution was actually delivered. Stored
    /// on the record so frequency caps survive a restart.
    #[serde(default)]
    pub email_sends: Vec<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub resume_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Execution {
    pub fn new(
        workflow_id: Uuid,
        user_id: impl Into<String>,
        trigger_data: Value,
        variables: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            user_id: user_id.into(),
            trigger_data,
            variables,
            current_step_index: 0,
            status: ExecutionStatus::Pending,
            email_sends: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            resume_at: None,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Runtime status of an execution.
///
/// `Pending -> Running -> {Waiting <-> Running} -> {Completed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Whether the transition is permitted by the execution state machine.
    pub fn can_transition(self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
                | (Waiting, Running)
                | (Waiting, Failed)
        )
    }
}
