//! Assignment planning for execution layers.
//!
//! The `TaskScheduler` walks a layer in priority order and, for each task,
//! picks the best available agent by a weighted mix of capability match and
//! free capacity, then reserves a slot on it in the `AgentPool`. Planning is
//! sequential; only the pool reservation is shared with concurrent
//! dispatches.

use crate::core::agent::{Agent, AgentId};
use crate::core::dag::ExecutionLayer;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::matcher::CapabilityMatcher;
use crate::orchestration::pool::AgentPool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

pub const DEFAULT_CAPABILITY_WEIGHT: f64 = 0.7;
pub const DEFAULT_WORKLOAD_WEIGHT: f64 = 0.3;
pub const DEFAULT_MIN_VIABLE_SCORE: f64 = 0.0;
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 10;

/// Tunables for assignment scoring.
///
/// The combined score is
/// `(capability_weight * capability + workload_weight * workload) / (capability_weight + workload_weight)`
/// where `workload = 1 - current_load / max_capacity`. The weights stay fixed
/// for the lifetime of a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub capability_weight: f64,
    pub workload_weight: f64,
    /// A candidate is viable only if its capability score is strictly above
    /// this value.
    pub min_viable_score: f64,
    /// Reservations a single layer may hold at once.
    pub max_concurrent_agents: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capability_weight: DEFAULT_CAPABILITY_WEIGHT,
            workload_weight: DEFAULT_WORKLOAD_WEIGHT,
            min_viable_score: DEFAULT_MIN_VIABLE_SCORE,
            max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
        }
    }
}

impl SchedulerConfig {
    /// # Errors
    ///
    /// Returns `Error::Validation` for non-finite, negative or all-zero
    /// weights, a non-finite viability threshold and a zero concurrency
    /// limit.
    pub fn validate(&self) -> Result<()> {
        if !self.capability_weight.is_finite() || !self.workload_weight.is_finite() {
            return Err(Error::Validation(
                "scheduler weights must be finite".to_string(),
            ));
        }
        if !self.min_viable_score.is_finite() {
            return Err(Error::Validation(
                "min_viable_score must be finite".to_string(),
            ));
        }
        if self.capability_weight < 0.0 || self.workload_weight < 0.0 {
            return Err(Error::Validation(
                "scheduler weights must not be negative".to_string(),
            ));
        }
        if self.capability_weight + self.workload_weight <= 0.0 {
            return Err(Error::Validation(
                "scheduler weights must not sum to zero".to_string(),
            ));
        }
        if self.max_concurrent_agents == 0 {
            return Err(Error::Validation(
                "max_concurrent_agents must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The two components behind an assignment score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignmentCriteria {
    pub capability: f64,
    pub workload: f64,
}

/// A task bound to an agent with a reserved slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub score: f64,
    pub criteria: AssignmentCriteria,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    /// No agent has any of the required capabilities.
    NoCapableAgent,
    /// Capable agents exist but none had a free slot.
    CapacityExhausted,
}

impl std::fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnassignedReason::NoCapableAgent => write!(f, "no capable agent"),
            UnassignedReason::CapacityExhausted => write!(f, "capacity exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedTask {
    pub task_id: TaskId,
    pub reason: UnassignedReason,
}

/// Outcome of planning one layer (or part of one).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulingResult {
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<UnassignedTask>,
    /// Tasks skipped because the layer already held `max_concurrent_agents`
    /// reservations. They wait for a release.
    pub deferred: Vec<TaskId>,
}

impl SchedulingResult {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.unassigned.is_empty() && self.deferred.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    agent_id: AgentId,
    score: f64,
    criteria: AssignmentCriteria,
}

#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Plan every unplanned task of `layer`.
    ///
    /// Tasks that are pending or ready and not already covered by
    /// `existing` are considered in layer order. Each assigned task moves to
    /// `Assigned`; the others are left `Ready` and reported as unassigned or
    /// deferred. `existing` counts toward the concurrency limit.
    pub fn plan_layer(
        &self,
        layer: &mut ExecutionLayer,
        pool: &AgentPool,
        matcher: &CapabilityMatcher,
        existing: &[Assignment],
    ) -> SchedulingResult {
        let planned: HashSet<&TaskId> = existing.iter().map(|a| &a.task_id).collect();
        let mut held = existing.len();
        let mut result = SchedulingResult::default();

        for task in layer.tasks.iter_mut() {
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Ready)
                || planned.contains(&task.id)
            {
                continue;
            }
            task.mark_ready();

            if held >= self.config.max_concurrent_agents {
                result.deferred.push(task.id.clone());
                continue;
            }

            match self.assign(task, pool, matcher) {
                Ok(assignment) => {
                    task.assign(assignment.agent_id);
                    held += 1;
                    result.assignments.push(assignment);
                }
                Err(reason) => {
                    warn!(task_id = %task.id, %reason, "task left unassigned");
                    result.unassigned.push(UnassignedTask {
                        task_id: task.id.clone(),
                        reason,
                    });
                }
            }
        }

        debug!(
            layer = layer.index,
            assigned = result.assignments.len(),
            unassigned = result.unassigned.len(),
            deferred = result.deferred.len(),
            "layer planned"
        );
        result
    }

    /// Choose an agent for one task and reserve a slot on it.
    fn assign(
        &self,
        task: &Task,
        pool: &AgentPool,
        matcher: &CapabilityMatcher,
    ) -> std::result::Result<Assignment, UnassignedReason> {
        let candidates = self.rank(task, &pool.available_agents(), matcher);

        for candidate in candidates {
            match pool.reserve(candidate.agent_id, &task.id) {
                Ok(()) => {
                    pool.record_assignment(candidate.agent_id, &task.id, candidate.score);
                    debug!(
                        task_id = %task.id,
                        agent_id = %candidate.agent_id,
                        score = candidate.score,
                        "task assigned"
                    );
                    return Ok(Assignment {
                        task_id: task.id.clone(),
                        agent_id: candidate.agent_id,
                        score: candidate.score,
                        criteria: candidate.criteria,
                    });
                }
                Err(e) => {
                    debug!(task_id = %task.id, agent_id = %candidate.agent_id, error = %e, "reservation lost, trying next candidate");
                }
            }
        }

        if self.any_capable(task, &pool.agents(), matcher) {
            Err(UnassignedReason::CapacityExhausted)
        } else {
            Err(UnassignedReason::NoCapableAgent)
        }
    }

    /// Viable candidates, best first. Ties keep the pool's order.
    fn rank(&self, task: &Task, agents: &[Agent], matcher: &CapabilityMatcher) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = agents
            .iter()
            .filter_map(|agent| {
                let capability = matcher.score(agent, task);
                if capability <= self.config.min_viable_score {
                    return None;
                }
                let criteria = AssignmentCriteria {
                    capability,
                    workload: agent.free_ratio(),
                };
                Some(Candidate {
                    agent_id: agent.id,
                    score: self.combine(criteria),
                    criteria,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    /// Whether any agent that accepts work could ever take the task.
    fn any_capable(&self, task: &Task, agents: &[Agent], matcher: &CapabilityMatcher) -> bool {
        agents.iter().any(|agent| {
            agent.status.accepts_work()
                && agent.max_capacity > 0
                && matcher.score(agent, task) > self.config.min_viable_score
        })
    }

    fn combine(&self, criteria: AssignmentCriteria) -> f64 {
        let total = self.config.capability_weight + self.config.workload_weight;
        if total <= 0.0 {
            return criteria.capability;
        }
        (self.config.capability_weight * criteria.capability
            + self.config.workload_weight * criteria.workload)
            / total
    }
}
