//! Host runtime seam.
//!
//! The orchestrator never starts processes itself. It asks an
//! `AgentRuntime` to spawn agents and to dispatch tasks to them, and wraps
//! both calls in the resilient executor.

use crate::core::agent::{AgentConfig, AgentId};
use crate::core::task::{Task, TaskId};
use crate::resilience::Retryable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the host runtime, classified by the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// Transient failures may be retried; permanent ones may not.
    pub retryable: bool,
}

impl RuntimeError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl Retryable for RuntimeError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Reference to a live agent inside the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentHandle {
    pub agent_id: AgentId,
    /// Runtime-specific address (session name, pane id, URL...).
    pub endpoint: String,
}

impl AgentHandle {
    pub fn new(agent_id: AgentId, endpoint: impl Into<String>) -> Self {
        Self {
            agent_id,
            endpoint: endpoint.into(),
        }
    }
}

/// What an agent reported back for a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: TaskId,
    #[serde(default)]
    pub summary: String,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start an agent. `agent_id` is the id the pool will know it by.
    async fn spawn(
        &self,
        agent_id: AgentId,
        config: &AgentConfig,
    ) -> Result<AgentHandle, RuntimeError>;

    /// Reconnect to an agent restored from persistence.
    async fn attach(&self, agent_id: AgentId) -> Result<AgentHandle, RuntimeError> {
        Ok(AgentHandle::new(agent_id, agent_id.to_string()))
    }

    /// Hand a task to an agent and wait for its result.
    async fn dispatch(&self, handle: &AgentHandle, task: &Task) -> Result<TaskOutput, RuntimeError>;
}
