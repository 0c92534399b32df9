use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Learner profile as exposed by the user/attribute store. Read-only
/// from the engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub user_type: UserType,
    pub tags: Vec<String>,
    /// Free-form attributes merged into execution variables at trigger time.
    pub attributes: HashMap<String, serde_json::Value>,
    /// Minutes east of UTC, used when a workflow respects user timezones.
    pub timezone_offset_minutes: Option<i32>,
    pub enrolled_course_ids: Vec<String>,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Student,
    Instructor,
    Admin,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            email: None,
            user_type: UserType::Student,
            tags: Vec::new(),
            attributes: HashMap::new(),
            timezone_offset_minutes: None,
            enrolled_course_ids: Vec::new(),
            last_active_at: None,
        }
    }
}

/// Telemetry event emitted by the engine toward the external
/// analytics/reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub step_id: Option<Uuid>,
    pub detail: Option<serde_json::Value>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Trigger / lifecycle events
    ExecutionStarted,
    TriggerRejected,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    // Step-level events
    StepExecuted,
    StepSkipped,
    StepFailed,
    DelayScheduled,
    VariantAssigned,
    ActionPerformed,
    GoalConverted,
    // Delivery events
    EmailSent,
    EmailSuppressed,
}

// ─── Message templates ──────────────────────────────────────────────────

/// Email template for workflow Email steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub body_template: String,
    pub html_template: Option<String>,
    pub variables: Vec<TemplateVariable>,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub default_value: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}
