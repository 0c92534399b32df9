//! CourseFlow — workflow execution engine for learning-platform email
//! automation.
//!
//! Entry point that wires the engine together, optionally seeds a demo
//! workflow, and runs the scheduler loop until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use courseflow_core::config::AppConfig;
use courseflow_core::templates::TemplateRenderer;
use courseflow_core::types::{MessageTemplate, TemplateStatus, UserProfile, UserType};
use courseflow_delivery::{BusinessHours, LoggingProvider, SuppressionList};
use courseflow_engine::types::{
    DelayUnit, StepConfig, TriggerConfig, Workflow, WorkflowStep,
};
use courseflow_engine::{
    scheduler, InMemoryExecutionStore, InMemoryScheduler, InMemoryUserDirectory,
    RecordingActionGateway, StepExecutor, WorkflowCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "courseflow")]
#[command(about = "Workflow execution engine for learning-platform email automation")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "COURSEFLOW__NODE_ID")]
    node_id: Option<String>,

    /// Scheduler poll interval in milliseconds (overrides config)
    #[arg(long, env = "COURSEFLOW__ENGINE__SCHEDULER_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Seed a demo onboarding workflow and trigger it once
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courseflow=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("CourseFlow starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.engine.scheduler_poll_interval_ms = interval;
    }

    info!(
        node_id = %config.node_id,
        poll_interval_ms = config.engine.scheduler_poll_interval_ms,
        max_steps_per_run = config.engine.max_steps_per_run,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryExecutionStore::new());
    let timers = Arc::new(InMemoryScheduler::new());
    let renderer = Arc::new(TemplateRenderer::new());
    let suppression = Arc::new(SuppressionList::new());
    let directory = Arc::new(InMemoryUserDirectory::new());
    let gateway = Arc::new(RecordingActionGateway::new());

    let executor = StepExecutor::new(
        renderer.clone(),
        Arc::new(LoggingProvider),
        suppression.clone(),
        directory.clone(),
        gateway.clone(),
    )
    .with_sender(
        config.delivery.from_email.clone(),
        config.delivery.from_name.clone(),
    )
    .with_business_hours(BusinessHours::new(
        config.engine.business_hours_start_hour,
        config.engine.business_hours_end_hour,
    ));

    let coordinator = Arc::new(
        WorkflowCoordinator::new(store.clone(), timers.clone(), executor, directory.clone())
            .with_max_steps_per_run(config.engine.max_steps_per_run),
    );

    if cli.demo {
        seed_demo(&coordinator, &renderer, &directory)?;
    }

    let driver = tokio::spawn(scheduler::drive(
        timers,
        coordinator,
        Duration::from_millis(config.engine.scheduler_poll_interval_ms),
    ));

    info!("CourseFlow running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    driver.abort();

    Ok(())
}

/// Register a template, a user, and a three-step onboarding workflow,
/// then trigger it once so the engine has something to chew on.
fn seed_demo(
    coordinator: &WorkflowCoordinator,
    renderer: &TemplateRenderer,
    directory: &InMemoryUserDirectory,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let welcome = renderer.register_template(MessageTemplate {
        id: Uuid::new_v4(),
        name: "welcome".into(),
        subject: "Welcome to the course, {{user_id}}!".into(),
        body_template: "Hi {{user_id}}, thanks for enrolling in {{course}}.".into(),
        html_template: None,
        variables: Vec::new(),
        status: TemplateStatus::Active,
        created_at: now,
        updated_at: now,
    });
    let followup = renderer.register_template(MessageTemplate {
        id: Uuid::new_v4(),
        name: "followup".into(),
        subject: "How is {{course}} going?".into(),
        body_template: "Hi {{user_id}}, just checking in on your progress.".into(),
        html_template: None,
        variables: Vec::new(),
        status: TemplateStatus::Active,
        created_at: now,
        updated_at: now,
    });

    directory.insert(UserProfile {
        user_id: "demo-user".into(),
        email: Some("demo-user@example.edu".into()),
        user_type: UserType::Student,
        ..Default::default()
    });

    let mut workflow = Workflow::new(
        "demo-onboarding",
        "Welcome email, one-minute pause, then a follow-up",
        TriggerConfig::Enrollment {
            course_id: None,
            category: None,
        },
    );
    workflow.steps.push(WorkflowStep::new(0, StepConfig::Email {
        template_id: welcome,
        goal_event: None,
    }));
    workflow.steps.push(WorkflowStep::new(1, StepConfig::Delay {
        amount: 1,
        unit: DelayUnit::Minutes,
    }));
    workflow.steps.push(WorkflowStep::new(2, StepConfig::Email {
        template_id: followup,
        goal_event: None,
    }));

    let id = coordinator.create_workflow(workflow)?;
    coordinator.activate(&id)?;
    let execution = coordinator.trigger(&id, "demo-user", json!({ "course": "rust-101" }))?;
    info!(workflow_id = %id, execution = ?execution, "demo workflow seeded");
    Ok(())
}
