//! Workflow execution engine — triggers multi-step, time-distributed drip
//! campaigns for individual users in response to platform events and
//! advances each user through a directed sequence of steps (email, delay,
//! condition branch, action, split test, goal), possibly over days or weeks.

pub mod condition;
pub mod coordinator;
pub mod cron;
pub mod directory;
pub mod executor;
pub mod limiter;
pub mod scheduler;
pub mod store;
pub mod types;

pub use coordinator::WorkflowCoordinator;
pub use directory::{InMemoryUserDirectory, RecordingActionGateway};
pub use executor::{ActionGateway, StepDisposition, StepExecutor, StepOutcome, UserStore};
pub use limiter::{DenyReason, ExecutionLimiter};
pub use scheduler::{InMemoryScheduler, Scheduler};
pub use store::{ExecutionStore, InMemoryExecutionStore};
