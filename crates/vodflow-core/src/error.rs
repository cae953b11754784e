use thiserror::Error;

use crate::domain::{TaskStatus, TaskType, WorkOrderId};

/// Failure of a `WorkOrderStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("work order {0} already exists")]
    AlreadyExists(WorkOrderId),

    #[error("work order record could not be decoded: {0}")]
    Codec(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A workflow declaration that cannot be turned into a task template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("workflow must declare at least one step")]
    NoSteps,

    #[error("step type cannot be empty")]
    EmptyType,

    #[error("step {0} is declared more than once")]
    DuplicateType(TaskType),

    #[error("step {task} depends on unknown step {dependency}")]
    UnknownDependency { task: TaskType, dependency: TaskType },

    #[error("step {0} cannot depend on itself")]
    SelfDependency(TaskType),

    #[error("workflow contains a cycle involving step {0}")]
    Cycle(TaskType),
}

/// Loading the workflow definition failed. Never cached; the next caller retries.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unsupported workflow definition scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid workflow definition location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("failed to read workflow definition {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to fetch workflow definition: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("failed to fetch workflow definition {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("workflow definition is not valid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid workflow definition: {0}")]
    Invalid(#[from] TemplateError),
}

/// Errors surfaced by `WorkOrderManager` operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("work order {id}: task {task_type} cannot move from {from} to {to}")]
    InvalidTransition {
        id: WorkOrderId,
        task_type: TaskType,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("work order {id}: task {task_type} cannot start before {waiting:?} complete")]
    DependenciesNotMet {
        id: WorkOrderId,
        task_type: TaskType,
        waiting: Vec<TaskType>,
    },

    #[error("work order {id}: gave up after {attempts} conflicting writes")]
    Contention { id: WorkOrderId, attempts: u32 },

    #[error("work order {0} is closed and cannot be reopened")]
    Reopen(WorkOrderId),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Errors raised by task executors and callback resolvers.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("remote job service error: {0}")]
    Remote(String),

    #[error("task payload is missing or malformed: {0}")]
    Payload(String),

    #[error("executor call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("executor for task type {0} is already registered")]
    AlreadyRegistered(TaskType),

    #[error("missing executors for task types: {0:?}")]
    MissingTaskTypes(Vec<TaskType>),
}

/// A required setting is missing or unparsable. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Creating a work order from a new-source-asset event failed.
///
/// Nothing is cached on failure; the next event for the asset retries.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid source asset s3://{bucket}/{key}: {reason}")]
    InvalidSource {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Wiring the orchestrator at startup failed. Fatal.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
