//! Orchestration layer for the hive multi-agent system.
//!
//! Leaf-first:
//! - matcher: capability scoring
//! - pool: live agents, reservations and capacity queries
//! - scheduler: per-layer assignment planning
//! - monitor: concurrent dispatch of one layer
//! - coordinator: the `Orchestrator` driving whole runs
//!
//! `runtime` and `events` are the seams to the host environment and to
//! observers.

mod coordinator;
mod events;
mod matcher;
mod monitor;
mod pool;
pub mod runtime;
mod scheduler;

pub use coordinator::{BlockedTask, Orchestrator, RunReport, TaskFailure};
pub use events::{EventBus, EventPayload, EventType, OrchestratorEvent};
pub use matcher::CapabilityMatcher;
pub use monitor::{
    DetachedDispatches, GroupSummary, HandleMap, LayerOutcome, LayerSummary,
    ParallelExecutionMonitor, CANCELLED_REASON,
};
pub use pool::{AgentCapacity, AgentPool, AgentStats};
pub use runtime::{AgentHandle, AgentRuntime, RuntimeError, TaskOutput};
pub use scheduler::{
    Assignment, AssignmentCriteria, SchedulerConfig, SchedulingResult, TaskScheduler,
    UnassignedReason, UnassignedTask,
};
