//! The orchestrator.
//!
//! An `Orchestrator` is constructed explicitly with its configuration, host
//! runtime and optional store; nothing here is process-global. It owns the
//! agent pool and runs submitted task sets layer by layer.

use crate::config::Config;
use crate::core::agent::{Agent, AgentConfig, AgentId, AgentStatus};
use crate::core::dag::TaskDependencyGraph;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::orchestration::events::{EventBus, OrchestratorEvent};
use crate::orchestration::monitor::{
    HandleMap, LayerSummary, ParallelExecutionMonitor, CANCELLED_REASON,
};
use crate::orchestration::pool::{AgentCapacity, AgentPool, AgentStats};
use crate::orchestration::runtime::AgentRuntime;
use crate::orchestration::scheduler::{TaskScheduler, UnassignedTask};
use crate::resilience::{ResilientOperationExecutor, SPAWN_AGENT};
use crate::store::{self, AgentStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub reason: String,
}

/// Structured result of a run. Partial progress is always kept.
///
/// `succeeded`, `failed`, `unassigned` and `blocked` are disjoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<TaskFailure>,
    pub unassigned: Vec<UnassignedTask>,
    pub blocked: Vec<BlockedTask>,
    pub layers: Vec<LayerSummary>,
    pub cancelled: bool,
    /// Final state of every submitted task, in layer order.
    pub tasks: Vec<Task>,
}

impl RunReport {
    /// True when every task completed.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.failed.is_empty()
            && self.unassigned.is_empty()
            && self.blocked.is_empty()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

pub struct Orchestrator {
    config: Config,
    runtime: Arc<dyn AgentRuntime>,
    store: Option<Arc<dyn AgentStore>>,
    executor: Arc<ResilientOperationExecutor>,
    pool: Arc<AgentPool>,
    handles: HandleMap,
    monitor: ParallelExecutionMonitor,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns `Error::Validation` if `config` is invalid.
    pub fn new(config: Config, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        config.validate()?;

        let executor = Arc::new(ResilientOperationExecutor::new(
            config.circuit_breaker.clone(),
            config.retry.clone(),
        ));
        let pool = Arc::new(AgentPool::new(Arc::new(EventBus::new())));
        let handles: HandleMap = Arc::new(RwLock::new(HashMap::new()));
        let monitor = ParallelExecutionMonitor::new(
            TaskScheduler::new(config.scheduler.clone()),
            Arc::clone(&pool),
            Arc::clone(&executor),
            Arc::clone(&runtime),
            Arc::clone(&handles),
        );

        Ok(Self {
            config,
            runtime,
            store: None,
            executor,
            pool,
            handles,
            monitor,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.monitor.set_store(Arc::clone(&store));
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn executor(&self) -> &ResilientOperationExecutor {
        &self.executor
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.pool.events().subscribe()
    }

    /// Validate `config`, spawn the agent through the runtime and register
    /// it.
    ///
    /// # Errors
    ///
    /// - `Error::AgentSpawn` for an invalid config (never retried)
    /// - `Error::CircuitOpen` when spawning is failing system-wide
    /// - `Error::RetryExhausted` or `Error::Runtime` when the runtime fails
    pub async fn spawn_agent(&self, config: &AgentConfig) -> Result<AgentId> {
        config.validate()?;

        let id = AgentId::new();
        let runtime = self.runtime.as_ref();
        let handle = self
            .executor
            .execute(SPAWN_AGENT, move || runtime.spawn(id, config))
            .await?;

        self.handles.write().insert(id, handle);
        self.pool.add_agent(Agent::with_id(id, config))?;
        info!(agent_id = %id, name = %config.name, category = %config.category, "agent spawned");
        self.checkpoint().await;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no such agent exists.
    pub async fn remove_agent(&self, id: AgentId) -> Result<Agent> {
        let agent = self.pool.remove_agent(id)?;
        self.handles.write().remove(&id);
        self.checkpoint().await;
        Ok(agent)
    }

    /// Load agents from the store and reconnect to them.
    ///
    /// Agents the runtime cannot reattach are kept but marked offline.
    /// Returns the number of agents registered.
    pub async fn restore_agents(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let agents = store.load_agents().await?;
        let mut restored = 0;
        for mut agent in agents {
            let id = agent.id;
            if self.pool.contains(id) {
                debug!(agent_id = %id, "agent already registered, skipping");
                continue;
            }

            let runtime = self.runtime.as_ref();
            match self
                .executor
                .execute(SPAWN_AGENT, move || runtime.attach(id))
                .await
            {
                Ok(handle) => {
                    self.handles.write().insert(id, handle);
                    if agent.status == AgentStatus::Offline {
                        agent.status = AgentStatus::Idle;
                    }
                }
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "could not reattach agent");
                    agent.status = AgentStatus::Offline;
                }
            }
            self.pool.add_agent(agent)?;
            restored += 1;
        }

        info!(restored, "agents restored");
        Ok(restored)
    }

    /// Run a task set to completion.
    ///
    /// The whole batch is rejected up front for a dependency cycle, an
    /// unknown dependency or a duplicate id. After that, per-task problems
    /// are collected in the report and independent work keeps going.
    pub async fn run(&self, tasks: Vec<Task>, cancel: CancellationToken) -> Result<RunReport> {
        let mut layers = TaskDependencyGraph::build(tasks)?;
        info!(
            layers = layers.len(),
            tasks = layers.iter().map(|l| l.len()).sum::<usize>(),
            "run started"
        );

        let mut report = RunReport::default();
        let mut poisoned: HashSet<TaskId> = HashSet::new();
        // (layer position, summary position, dispatches)
        let mut detached = Vec::new();

        for (position, layer) in layers.iter_mut().enumerate() {
            if report.cancelled || cancel.is_cancelled() {
                report.cancelled = true;
                for task in layer.tasks.iter_mut().filter(|t| !t.is_resolved()) {
                    task.block(CANCELLED_REASON);
                }
                continue;
            }

            for task in layer.tasks.iter_mut() {
                let blocker = task
                    .depends_on
                    .iter()
                    .find(|d| poisoned.contains(*d))
                    .cloned();
                if let Some(dep) = blocker {
                    let reason = format!("dependency {dep} did not complete");
                    debug!(task_id = %task.id, %reason, "pre-blocking dependent");
                    task.block(&reason);
                }
            }

            let outcome = self.monitor.run_layer(layer, &cancel).await;
            report.cancelled |= outcome.cancelled;
            report.unassigned.extend(outcome.unassigned);
            if !outcome.detached.is_empty() {
                detached.push((position, report.layers.len(), outcome.detached));
            }
            report.layers.push(outcome.summary);
            self.checkpoint().await;

            poisoned.extend(
                layer
                    .tasks
                    .iter()
                    .filter(|t| t.status.poisons_dependents())
                    .map(|t| t.id.clone()),
            );
        }

        if !detached.is_empty() {
            for (position, summary, dispatches) in detached {
                self.monitor
                    .settle_detached(&mut layers[position], &mut report.layers[summary], dispatches)
                    .await;
            }
            self.checkpoint().await;
        }

        let unassigned: HashSet<&TaskId> = report.unassigned.iter().map(|u| &u.task_id).collect();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        for task in layers.iter().flat_map(|l| l.tasks.iter()) {
            match &task.status {
                TaskStatus::Completed => succeeded.push(task.id.clone()),
                TaskStatus::Failed { error } => failed.push(TaskFailure {
                    task_id: task.id.clone(),
                    error: error.clone(),
                }),
                TaskStatus::Blocked { reason } if !unassigned.contains(&task.id) => {
                    blocked.push(BlockedTask {
                        task_id: task.id.clone(),
                        reason: reason.clone(),
                    })
                }
                _ => {}
            }
        }
        report.succeeded = succeeded;
        report.failed = failed;
        report.blocked = blocked;
        report.tasks = layers.into_iter().flat_map(|l| l.tasks).collect();

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            unassigned = report.unassigned.len(),
            blocked = report.blocked.len(),
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    pub fn agent_stats(&self) -> AgentStats {
        self.pool.stats()
    }

    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no such agent exists.
    pub fn agent_capacity(&self, id: AgentId) -> Result<AgentCapacity> {
        self.pool.capacity(id)
    }

    async fn checkpoint(&self) {
        if let Some(store) = &self.store {
            store::checkpoint(store.as_ref(), &self.pool.agents()).await;
        }
    }
}
