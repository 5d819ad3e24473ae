//! Concurrent execution of one layer.
//!
//! The `ParallelExecutionMonitor` plans a layer, dispatches every assignment
//! through the resilient executor at once, and settles tasks as their
//! dispatches finish. Each release gives waiting tasks (deferred by the
//! concurrency limit, or short of a free capable agent) another planning
//! pass. The layer is done when every task is completed, failed or blocked.
//!
//! Cancel-tolerant dispatches run on their own tokio tasks. When a run is
//! cancelled they are detached from the layer instead of holding it open,
//! and the coordinator settles them once no more layers will start.

use crate::core::agent::AgentId;
use crate::core::dag::ExecutionLayer;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::orchestration::matcher::CapabilityMatcher;
use crate::orchestration::pool::AgentPool;
use crate::orchestration::runtime::{AgentHandle, AgentRuntime, RuntimeError, TaskOutput};
use crate::orchestration::scheduler::{
    Assignment, TaskScheduler, UnassignedReason, UnassignedTask,
};
use crate::resilience::{ResilienceError, ResilientOperationExecutor, DISPATCH_TASK};
use crate::store::{self, AgentStore};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason recorded on tasks blocked by cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

/// Runtime handles of live agents, shared with the coordinator.
pub type HandleMap = Arc<RwLock<HashMap<AgentId, AgentHandle>>>;

type DispatchFuture = BoxFuture<'static, DispatchOutcome>;

/// Terminal counts for one `parallel_group` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// What happened in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub index: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub duration_ms: u64,
    /// Sum of per-task dispatch time over layer wall time; 1.0 when either
    /// is zero.
    pub parallel_speedup: f64,
    pub groups: BTreeMap<String, GroupSummary>,
}

#[derive(Debug)]
pub struct LayerOutcome {
    pub summary: LayerSummary,
    /// Tasks that never got an agent in this layer.
    pub unassigned: Vec<UnassignedTask>,
    pub cancelled: bool,
    /// Cancel-tolerant dispatches still running when the layer resolved.
    pub detached: DetachedDispatches,
}

/// Cancel-tolerant dispatches left running after a cancellation.
///
/// Their tasks stay `Running` and their agents keep the reserved slot until
/// [`ParallelExecutionMonitor::settle_detached`] records the real outcome.
#[derive(Default)]
pub struct DetachedDispatches {
    task_ids: Vec<TaskId>,
    pending: FuturesUnordered<DispatchFuture>,
}

impl DetachedDispatches {
    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }
}

impl fmt::Debug for DetachedDispatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedDispatches")
            .field("task_ids", &self.task_ids)
            .finish()
    }
}

struct DispatchOutcome {
    task_id: TaskId,
    agent_id: AgentId,
    result: Result<TaskOutput, ResilienceError<RuntimeError>>,
    elapsed: Duration,
}

pub struct ParallelExecutionMonitor {
    scheduler: TaskScheduler,
    matcher: CapabilityMatcher,
    pool: Arc<AgentPool>,
    executor: Arc<ResilientOperationExecutor>,
    runtime: Arc<dyn AgentRuntime>,
    handles: HandleMap,
    store: Option<Arc<dyn AgentStore>>,
}

impl ParallelExecutionMonitor {
    pub fn new(
        scheduler: TaskScheduler,
        pool: Arc<AgentPool>,
        executor: Arc<ResilientOperationExecutor>,
        runtime: Arc<dyn AgentRuntime>,
        handles: HandleMap,
    ) -> Self {
        Self {
            scheduler,
            matcher: CapabilityMatcher::new(),
            pool,
            executor,
            runtime,
            handles,
            store: None,
        }
    }

    /// Checkpoint the pool to `store` after every planning pass that
    /// assigns work.
    pub fn set_store(&mut self, store: Arc<dyn AgentStore>) {
        self.store = Some(store);
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Run `layer` to resolution.
    ///
    /// On cancellation no new work is planned and waiting tasks are blocked.
    /// Strict dispatches are awaited. Cancel-tolerant dispatches keep running
    /// and are handed back in [`LayerOutcome::detached`].
    pub async fn run_layer(
        &self,
        layer: &mut ExecutionLayer,
        cancel: &CancellationToken,
    ) -> LayerOutcome {
        let started = Instant::now();
        info!(layer = layer.index, tasks = layer.len(), "layer started");

        let mut in_flight: FuturesUnordered<DispatchFuture> = FuturesUnordered::new();
        let mut tolerant: FuturesUnordered<DispatchFuture> = FuturesUnordered::new();
        let mut active: Vec<Assignment> = Vec::new();
        let mut unassigned = Vec::new();
        let mut busy = Duration::ZERO;
        let mut detached = DetachedDispatches::default();
        let mut cancelled = cancel.is_cancelled();

        if cancelled {
            block_waiting(layer, CANCELLED_REASON);
        }

        loop {
            if !cancelled {
                let assigned =
                    self.plan(layer, &mut active, &mut unassigned, &mut in_flight, &mut tolerant);
                if assigned > 0 {
                    self.checkpoint().await;
                }
            }
            if in_flight.is_empty() && tolerant.is_empty() {
                break;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    warn!(
                        layer = layer.index,
                        in_flight = in_flight.len(),
                        detached = tolerant.len(),
                        "run cancelled"
                    );
                    detached = detach(layer, std::mem::take(&mut tolerant));
                    block_waiting(layer, CANCELLED_REASON);
                    continue;
                }
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => outcome,
                Some(outcome) = tolerant.next(), if !tolerant.is_empty() => outcome,
                else => break,
            };

            busy += outcome.elapsed;
            active.retain(|a| a.task_id != outcome.task_id);
            self.settle(layer, outcome);
        }

        for task in layer
            .tasks
            .iter_mut()
            .filter(|t| !t.is_resolved() && !detached.task_ids.contains(&t.id))
        {
            debug!(task_id = %task.id, status = %task.status, "unresolved at layer end");
            task.block("not scheduled");
        }

        let summary = summarize(layer, started.elapsed(), busy);
        info!(
            layer = summary.index,
            completed = summary.completed,
            failed = summary.failed,
            blocked = summary.blocked,
            duration_ms = summary.duration_ms,
            speedup = summary.parallel_speedup,
            "layer resolved"
        );
        LayerOutcome {
            summary,
            unassigned,
            cancelled,
            detached,
        }
    }

    /// Wait for detached dispatches of `layer` and record their outcomes.
    ///
    /// `summary` is recounted afterwards; its timings are left as they were
    /// when the layer resolved.
    pub async fn settle_detached(
        &self,
        layer: &mut ExecutionLayer,
        summary: &mut LayerSummary,
        mut detached: DetachedDispatches,
    ) {
        debug!(layer = layer.index, tasks = detached.task_ids.len(), "awaiting detached dispatches");
        while let Some(outcome) = detached.pending.next().await {
            self.settle(layer, outcome);
        }
        tally(summary, layer);
        info!(
            layer = summary.index,
            completed = summary.completed,
            failed = summary.failed,
            "detached dispatches settled"
        );
    }

    /// One planning pass: dispatch new assignments and settle unassignable
    /// tasks. Returns the number of new assignments.
    fn plan(
        &self,
        layer: &mut ExecutionLayer,
        active: &mut Vec<Assignment>,
        unassigned: &mut Vec<UnassignedTask>,
        in_flight: &mut FuturesUnordered<DispatchFuture>,
        tolerant: &mut FuturesUnordered<DispatchFuture>,
    ) -> usize {
        let plan = self
            .scheduler
            .plan_layer(layer, &self.pool, &self.matcher, active);
        let mut assigned = 0;

        for assignment in plan.assignments {
            let Some(task) = layer.get_task_mut(&assignment.task_id) else {
                self.pool.release(assignment.agent_id, &assignment.task_id);
                continue;
            };
            task.start(assignment.agent_id);
            let dispatch = self.dispatch(assignment.agent_id, task.clone());
            if task.cancel_tolerant {
                tolerant.push(spawn_dispatch(task.id.clone(), assignment.agent_id, dispatch));
            } else {
                in_flight.push(dispatch);
            }
            active.push(assignment);
            assigned += 1;
        }

        for miss in plan.unassigned {
            // A release may still free a capable agent.
            if miss.reason == UnassignedReason::CapacityExhausted && !active.is_empty() {
                continue;
            }
            if let Some(task) = layer.get_task_mut(&miss.task_id) {
                task.block(&miss.reason.to_string());
            }
            unassigned.push(miss);
        }
        assigned
    }

    async fn checkpoint(&self) {
        if let Some(store) = &self.store {
            store::checkpoint(store.as_ref(), &self.pool.agents()).await;
        }
    }

    fn dispatch(&self, agent_id: AgentId, task: Task) -> DispatchFuture {
        let executor = Arc::clone(&self.executor);
        let runtime = Arc::clone(&self.runtime);
        let handle = self.handles.read().get(&agent_id).cloned();

        async move {
            let started = Instant::now();
            debug!(task_id = %task.id, agent_id = %agent_id, "dispatching");
            let result = match handle {
                Some(handle) => {
                    let runtime = runtime.as_ref();
                    let (handle, task) = (&handle, &task);
                    executor
                        .execute(DISPATCH_TASK, move || runtime.dispatch(handle, task))
                        .await
                }
                None => Err(ResilienceError::Operation(RuntimeError::permanent(format!(
                    "no runtime handle for agent {agent_id}"
                )))),
            };
            DispatchOutcome {
                task_id: task.id,
                agent_id,
                result,
                elapsed: started.elapsed(),
            }
        }
        .boxed()
    }

    fn settle(&self, layer: &mut ExecutionLayer, outcome: DispatchOutcome) {
        let success = outcome.result.is_ok();
        if let Some(task) = layer.get_task_mut(&outcome.task_id) {
            match &outcome.result {
                Ok(output) => {
                    info!(task_id = %task.id, agent_id = %outcome.agent_id, summary = %output.summary, "task completed");
                    task.complete();
                }
                Err(e) => {
                    warn!(task_id = %task.id, agent_id = %outcome.agent_id, error = %e, "task failed");
                    task.fail(&e.to_string());
                }
            }
        }
        self.pool
            .complete_task(outcome.agent_id, &outcome.task_id, success);
    }
}

/// Run `dispatch` on its own tokio task so it keeps going once detached.
fn spawn_dispatch(task_id: TaskId, agent_id: AgentId, dispatch: DispatchFuture) -> DispatchFuture {
    let started = Instant::now();
    let handle = tokio::spawn(dispatch);
    async move {
        handle.await.unwrap_or_else(|e| DispatchOutcome {
            task_id,
            agent_id,
            result: Err(ResilienceError::Operation(RuntimeError::permanent(format!(
                "dispatch aborted: {e}"
            )))),
            elapsed: started.elapsed(),
        })
    }
    .boxed()
}

fn detach(layer: &ExecutionLayer, pending: FuturesUnordered<DispatchFuture>) -> DetachedDispatches {
    let task_ids = layer
        .tasks
        .iter()
        .filter(|t| t.cancel_tolerant && matches!(t.status, TaskStatus::Running { .. }))
        .map(|t| t.id.clone())
        .collect();
    DetachedDispatches { task_ids, pending }
}

/// Block every task still waiting for an agent.
fn block_waiting(layer: &mut ExecutionLayer, reason: &str) {
    for task in layer.tasks.iter_mut() {
        if matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
            task.block(reason);
        }
    }
}

fn summarize(layer: &ExecutionLayer, wall: Duration, busy: Duration) -> LayerSummary {
    let mut summary = LayerSummary {
        index: layer.index,
        completed: 0,
        failed: 0,
        blocked: 0,
        duration_ms: wall.as_millis() as u64,
        parallel_speedup: speedup(wall, busy),
        groups: BTreeMap::new(),
    };
    tally(&mut summary, layer);
    summary
}

fn tally(summary: &mut LayerSummary, layer: &ExecutionLayer) {
    summary.completed = 0;
    summary.failed = 0;
    summary.blocked = 0;
    summary.groups.clear();

    for task in &layer.tasks {
        let group = task
            .parallel_group
            .as_ref()
            .map(|g| summary.groups.entry(g.clone()).or_default());
        match task.status {
            TaskStatus::Completed => {
                summary.completed += 1;
                if let Some(g) = group {
                    g.completed += 1;
                }
            }
            TaskStatus::Failed { .. } => {
                summary.failed += 1;
                if let Some(g) = group {
                    g.failed += 1;
                }
            }
            TaskStatus::Blocked { .. } => {
                summary.blocked += 1;
                if let Some(g) = group {
                    g.blocked += 1;
                }
            }
            _ => {}
        }
    }
}

fn speedup(wall: Duration, busy: Duration) -> f64 {
    if wall.is_zero() || busy.is_zero() {
        return 1.0;
    }
    busy.as_secs_f64() / wall.as_secs_f64()
}
