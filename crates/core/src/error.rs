use thiserror::Error;
use uuid::Uuid;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("Execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("Branch resolution error: {0}")]
    BranchResolution(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
