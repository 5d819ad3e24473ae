use thiserror::Error;

use crate::core::agent::{AgentId, AgentStatus};
use crate::core::task::TaskId;
use crate::orchestration::runtime::RuntimeError;
use crate::resilience::ResilienceError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency cycle detected among tasks: {}", join_ids(.remaining))]
    DependencyCycle {
        /// Every task left over once Kahn peeling stalled.
        remaining: Vec<TaskId>,
        /// The strongly connected components that actually form cycles.
        cycles: Vec<Vec<TaskId>>,
    },

    #[error("Task {task} depends on unknown task {missing}")]
    UnknownDependency { task: TaskId, missing: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Agent {agent_id} is at capacity ({current_load}/{max_capacity})")]
    CapacityExceeded {
        agent_id: AgentId,
        current_load: u32,
        max_capacity: u32,
    },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: AgentId },

    #[error("Agent {id} is {status} and cannot take work")]
    AgentUnavailable { id: AgentId, status: AgentStatus },

    #[error("Circuit open for operation '{operation}'")]
    CircuitOpen { operation: String },

    #[error("Operation '{operation}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: RuntimeError,
    },

    #[error("Agent spawn rejected: {0}")]
    AgentSpawn(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ResilienceError<RuntimeError>> for Error {
    fn from(err: ResilienceError<RuntimeError>) -> Self {
        match err {
            ResilienceError::CircuitOpen { operation } => Error::CircuitOpen { operation },
            ResilienceError::RetryExhausted {
                operation,
                attempts,
                last_error,
            } => Error::RetryExhausted {
                operation,
                attempts,
                last_error,
            },
            ResilienceError::Operation(e) => Error::Runtime(e),
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
