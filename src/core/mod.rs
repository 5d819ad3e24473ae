//! Core domain models: tasks, agents and the dependency graph.

pub mod agent;
pub mod dag;
pub mod task;

pub use agent::{
    validate_agent_name, Agent, AgentCategory, AgentConfig, AgentId, AgentStatus, Complexity,
};
pub use dag::{ExecutionLayer, TaskDependencyGraph};
pub use task::{Priority, Task, TaskId, TaskStatus};
