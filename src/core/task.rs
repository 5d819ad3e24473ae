//! Task data model.
//!
//! Tasks are the atomic units of work handed to agents. Each task declares
//! the capabilities it needs and the tasks it depends on, and tracks its own
//! lifecycle status and timing.

use crate::core::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Caller-chosen identifier for a task, unique within a submitted set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Ordering is `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> Ready -> Assigned -> Running -> {Completed | Failed}`, with
/// `Blocked` reachable from any non-terminal state when a dependency fails,
/// no agent can take the task, or the run is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Submitted, dependencies not yet resolved.
    #[default]
    Pending,
    /// Dependencies satisfied, waiting for an agent.
    Ready,
    /// An agent has been reserved for the task.
    Assigned {
        agent_id: AgentId,
    },
    /// Dispatched to the agent.
    Running {
        agent_id: AgentId,
    },
    Completed,
    Failed {
        error: String,
    },
    Blocked {
        reason: String,
    },
}

impl TaskStatus {
    /// Completed, failed and blocked tasks count as resolved for a layer.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Blocked { .. }
        )
    }

    /// True when dependents of this task can never run.
    pub fn poisons_dependents(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. } | TaskStatus::Blocked { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Assigned { agent_id } => write!(f, "assigned: {}", agent_id.short()),
            TaskStatus::Running { agent_id } => write!(f, "running: {}", agent_id.short()),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
        }
    }
}

/// A single unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// Reporting tag only; never affects scheduling.
    #[serde(default)]
    pub parallel_group: Option<String>,
    /// When a run is cancelled, in-flight work for this task stops holding its
    /// layer open and is settled after the last layer.
    #[serde(default)]
    pub cancel_tolerant: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with medium priority and no requirements.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            description: String::new(),
            priority: Priority::default(),
            required_capabilities: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            parallel_group: None,
            cancel_tolerant: false,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn depends_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.parallel_group = Some(group.to_string());
        self
    }

    pub fn cancel_tolerant(mut self) -> Self {
        self.cancel_tolerant = true;
        self
    }

    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    pub fn assign(&mut self, agent_id: AgentId) {
        self.status = TaskStatus::Assigned { agent_id };
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self, agent_id: AgentId) {
        self.status = TaskStatus::Running { agent_id };
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn block(&mut self, reason: &str) {
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
    }

    /// The agent currently holding this task, if any.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self.status {
            TaskStatus::Assigned { agent_id } | TaskStatus::Running { agent_id } => Some(agent_id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }
}
