//! Parallel execution correctness tests.
//!
//! These tests verify that runs use the pool concurrently without ever
//! exceeding agent capacity or the concurrency limit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hive::core::{AgentStatus, TaskDependencyGraph, TaskStatus};
use hive::orchestration::{CapabilityMatcher, EventPayload, TaskScheduler, UnassignedReason};

use crate::fixtures::{
    drain, independent_tasks, orchestrator, orchestrator_with, spawn, task, test_config,
    ScriptedRuntime,
};

/// Test: Capacity bounds concurrency
/// Given two agents with two slots each and ten independent tasks
/// When the set is run
/// Then at most four run at once and every task completes
#[tokio::test(start_paused = true)]
async fn test_capacity_bounds_concurrency() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 2).await;
    spawn(&orch, "dev-2", &[], 2).await;
    let mut events = orch.subscribe();

    let report = orch
        .run(independent_tasks(10), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded.len(), 10);
    assert_eq!(runtime.max_concurrency(), 4);

    // Replay the event stream and check per-agent load.
    let mut load: HashMap<_, i64> = HashMap::new();
    for event in drain(&mut events) {
        match event.payload {
            EventPayload::TaskAssigned { agent_id, .. } => {
                let l = load.entry(agent_id).or_default();
                *l += 1;
                assert!(*l <= 2, "agent {agent_id} went over capacity");
            }
            EventPayload::TaskCompleted { agent_id, .. } => {
                *load.entry(agent_id).or_default() -= 1;
            }
            _ => {}
        }
    }
    assert!(load.values().all(|l| *l == 0));
}

/// Test: Concurrency limit
/// Given one agent with ten slots and a limit of two concurrent assignments
/// When six tasks run
/// Then no more than two are ever in flight
#[tokio::test(start_paused = true)]
async fn test_max_concurrent_agents_limit() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let mut config = test_config();
    config.scheduler.max_concurrent_agents = 2;
    let orch = orchestrator_with(config, &runtime);
    spawn(&orch, "big", &[], 10).await;

    let report = orch
        .run(independent_tasks(6), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(runtime.max_concurrency(), 2);
    assert!((300..=310).contains(&report.layers[0].duration_ms));
    assert!((report.layers[0].parallel_speedup - 2.0).abs() < 0.1);
}

/// Test: Single slot, two tasks
/// Given one agent with one slot covering capability "x"
/// When a layer of two tasks needing "x" is planned
/// Then one is assigned and the other is reported as capacity exhausted
#[tokio::test(start_paused = true)]
async fn test_single_slot_plan() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    let agent = spawn(&orch, "solo", &["x"], 1).await;

    let mut layers =
        TaskDependencyGraph::build(vec![task("t1").requires(["x"]), task("t2").requires(["x"])])
            .unwrap();
    let scheduler = TaskScheduler::new(orch.config().scheduler.clone());
    let result = scheduler.plan_layer(&mut layers[0], orch.pool(), &CapabilityMatcher::new(), &[]);

    assert_eq!(result.assignments.len(), 1);
    assert_eq!(result.assignments[0].agent_id, agent);
    assert_eq!(result.unassigned.len(), 1);
    assert_eq!(result.unassigned[0].reason, UnassignedReason::CapacityExhausted);
    assert_eq!(orch.agent_capacity(agent).unwrap().current_load, 1);
    assert!(!orch.agent_capacity(agent).unwrap().is_available);
    assert_eq!(layers[0].tasks[1].status, TaskStatus::Ready);

    orch.pool().release(agent, &result.assignments[0].task_id);
    assert_eq!(orch.agent_capacity(agent).unwrap().current_load, 0);
}

/// Test: Single slot run re-plans
/// Given one agent with one slot
/// When two independent tasks run
/// Then the second runs once the first releases the slot
#[tokio::test(start_paused = true)]
async fn test_single_slot_run_serializes() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "solo", &["x"], 1).await;

    let tasks = vec![task("t1").requires(["x"]), task("t2").requires(["x"])];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert!(report.unassigned.is_empty());
    assert_eq!(runtime.max_concurrency(), 1);
    assert!(runtime.finished_before_started("t1", "t2"));
}

/// Test: Workload balancing
/// Given two equally capable agents with two slots each
/// When two tasks are run
/// Then they are spread across both agents
#[tokio::test(start_paused = true)]
async fn test_work_spread_across_agents() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &["rust"], 2).await;
    spawn(&orch, "dev-2", &["rust"], 2).await;
    let mut events = orch.subscribe();

    let tasks = vec![task("t1").requires(["rust"]), task("t2").requires(["rust"])];
    orch.run(tasks, CancellationToken::new()).await.unwrap();

    let agents: HashSet<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::TaskAssigned { agent_id, .. } => Some(agent_id),
            _ => None,
        })
        .collect();
    assert_eq!(agents.len(), 2, "tasks should land on different agents");
}

/// Test: Offline agents are skipped
/// Given an offline agent and an idle one
/// When tasks run
/// Then only the idle agent receives work
#[tokio::test(start_paused = true)]
async fn test_offline_agent_skipped() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    let offline = spawn(&orch, "down", &[], 4).await;
    let online = spawn(&orch, "up", &[], 4).await;
    orch.pool().set_status(offline, AgentStatus::Offline).unwrap();
    let mut events = orch.subscribe();

    let report = orch
        .run(independent_tasks(3), CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    for event in drain(&mut events) {
        if let EventPayload::TaskAssigned { agent_id, .. } = event.payload {
            assert_eq!(agent_id, online);
        }
    }
    let stats = orch.agent_stats();
    assert_eq!(stats.offline, 1);
    assert_eq!(stats.idle, 1);
}
