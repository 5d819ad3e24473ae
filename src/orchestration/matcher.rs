//! Capability matching between agents and tasks.

use crate::core::agent::Agent;
use crate::core::task::Task;

/// Scores how well an agent covers a task's required capabilities.
///
/// Capability names are a controlled vocabulary, so matching is exact set
/// membership. Scoring is pure: the same agent and task always give the same
/// score.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityMatcher;

impl CapabilityMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Fraction of `task.required_capabilities` the agent has, in `[0, 1]`.
    ///
    /// A task with no requirements is a full match for any agent.
    pub fn score(&self, agent: &Agent, task: &Task) -> f64 {
        let required = &task.required_capabilities;
        if required.is_empty() {
            return 1.0;
        }
        let matched = required
            .iter()
            .filter(|cap| agent.capabilities.contains(*cap))
            .count();
        matched as f64 / required.len() as f64
    }

    /// True when the agent has every required capability.
    pub fn covers(&self, agent: &Agent, task: &Task) -> bool {
        task.required_capabilities.is_subset(&agent.capabilities)
    }
}
