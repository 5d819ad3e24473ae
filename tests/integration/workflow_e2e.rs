//! End-to-end run tests.
//!
//! These tests submit whole task sets to an orchestrator and check the
//! resulting report, layer summaries and event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hive::core::{Priority, TaskId, TaskStatus};
use hive::orchestration::{EventPayload, EventType};
use hive::Error;

use crate::fixtures::{
    diamond, drain, independent_tasks, orchestrator, spawn, task, ScriptedRuntime,
};

/// Test: Diamond workflow
/// Given A -> {B, C} -> D and two single-slot agents
/// When the set is run
/// Then three layers execute in order and B, C run side by side
#[tokio::test(start_paused = true)]
async fn test_diamond_runs_layer_by_layer() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &["rust"], 1).await;
    spawn(&orch, "dev-2", &["rust"], 1).await;

    let report = orch.run(diamond(), CancellationToken::new()).await.unwrap();

    assert!(report.is_success(), "diamond should complete: {report:?}");
    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(report.layers.len(), 3);
    assert_eq!(report.layers[0].completed, 1);
    assert_eq!(report.layers[1].completed, 2);
    assert_eq!(report.layers[2].completed, 1);

    assert_eq!(runtime.max_concurrency(), 2, "B and C should overlap");
    assert!(runtime.finished_before_started("A", "B"));
    assert!(runtime.finished_before_started("A", "C"));
    assert!(runtime.finished_before_started("B", "D"));
    assert!(runtime.finished_before_started("C", "D"));

    assert!(
        report.layers[1].parallel_speedup > 1.5,
        "middle layer speedup was {}",
        report.layers[1].parallel_speedup
    );

    // Slots are all returned at the end of the run.
    assert_eq!(orch.pool().total_load(), 0);
    assert_eq!(orch.agent_stats().idle, 2);
}

/// Test: Empty task set
/// Given no tasks
/// When the set is run
/// Then an empty successful report comes back
#[tokio::test(start_paused = true)]
async fn test_empty_task_set() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 1).await;

    let report = orch.run(Vec::new(), CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert!(report.layers.is_empty());
    assert!(report.tasks.is_empty());
    assert_eq!(runtime.dispatch_calls(), 0);
}

/// Test: Cycle rejects the batch
/// Given a <-> b plus an independent task c
/// When the set is run
/// Then the run fails with a cycle error and nothing is dispatched
#[tokio::test(start_paused = true)]
async fn test_cycle_rejects_whole_batch() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 2).await;

    let tasks = vec![
        task("a").depends_on(["b"]),
        task("b").depends_on(["a"]),
        task("c"),
    ];

    match orch.run(tasks, CancellationToken::new()).await {
        Err(Error::DependencyCycle { remaining, cycles }) => {
            assert_eq!(remaining, vec![TaskId::from("a"), TaskId::from("b")]);
            assert_eq!(cycles.len(), 1);
            assert_eq!(cycles[0].len(), 2);
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert_eq!(runtime.dispatch_calls(), 0, "c must not run either");
}

/// Test: Unknown dependency and duplicate ids
/// Given malformed task sets
/// When they are run
/// Then each is rejected before any dispatch
#[tokio::test(start_paused = true)]
async fn test_malformed_sets_rejected() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 2).await;

    let result = orch
        .run(vec![task("x").depends_on(["ghost"])], CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(Error::UnknownDependency { ref task, ref missing })
            if task.as_str() == "x" && missing.as_str() == "ghost"
    ));

    let result = orch
        .run(vec![task("x"), task("x")], CancellationToken::new())
        .await;
    assert!(matches!(result, Err(Error::DuplicateTask(ref id)) if id.as_str() == "x"));

    assert_eq!(runtime.dispatch_calls(), 0);
}

/// Test: Capability routing
/// Given a designer and a coder
/// When a design task and a dependent rust task run
/// Then each lands on the agent that covers it
#[tokio::test(start_paused = true)]
async fn test_tasks_routed_by_capability() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    let designer = spawn(&orch, "designer", &["design"], 2).await;
    let coder = spawn(&orch, "coder", &["rust"], 2).await;
    let mut events = orch.subscribe();

    let tasks = vec![
        task("schema").requires(["design"]),
        task("api").requires(["rust"]).depends_on(["schema"]),
    ];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();
    assert!(report.is_success());

    let assigned: HashMap<String, _> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::TaskAssigned {
                task_id, agent_id, score,
            } => Some((task_id.to_string(), (agent_id, score))),
            _ => None,
        })
        .collect();

    assert_eq!(assigned["schema"].0, designer);
    assert_eq!(assigned["api"].0, coder);
    // Full capability match on an idle agent.
    assert!((assigned["api"].1 - 1.0).abs() < 1e-9);
}

/// Test: Priority order within a layer
/// Given one single-slot agent and three independent tasks
/// When they run
/// Then they are dispatched highest priority first
#[tokio::test(start_paused = true)]
async fn test_priority_orders_dispatch() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "solo", &[], 1).await;

    let tasks = vec![
        task("low").with_priority(Priority::Low),
        task("critical").with_priority(Priority::Critical),
        task("medium"),
    ];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(runtime.started(), vec!["critical", "medium", "low"]);
}

/// Test: Event stream for one task
/// Given a subscriber attached before the agent is spawned
/// When one task runs
/// Then the agent's events arrive in order
#[tokio::test(start_paused = true)]
async fn test_event_stream_order() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    let mut events = orch.subscribe();

    let agent = spawn(&orch, "solo", &[], 1).await;
    orch.run(vec![task("only")], CancellationToken::new())
        .await
        .unwrap();
    orch.remove_agent(agent).await.unwrap();

    let received = drain(&mut events);
    let kinds: Vec<EventType> = received.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::AgentCreated,
            EventType::AgentStatusChanged,
            EventType::TaskAssigned,
            EventType::TaskCompleted,
            EventType::AgentStatusChanged,
            EventType::AgentRemoved,
        ]
    );
    assert!(received.iter().all(|e| e.payload.agent_id() == agent));
    assert!(matches!(
        received[3].payload,
        EventPayload::TaskCompleted { success: true, .. }
    ));
    assert!(received
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

/// Test: Parallel groups are reported, not scheduled
/// Given tasks tagged with two groups in one layer
/// When they run
/// Then the layer summary counts them per group
#[tokio::test(start_paused = true)]
async fn test_group_summary() {
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.break_task("fe-2");
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 4).await;

    let tasks = vec![
        task("be-1").in_group("backend"),
        task("be-2").in_group("backend"),
        task("fe-1").in_group("frontend"),
        task("fe-2").in_group("frontend"),
        task("misc"),
    ];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();

    let groups = &report.layers[0].groups;
    assert_eq!(groups.len(), 2);
    assert_eq!(groups["backend"].completed, 2);
    assert_eq!(groups["frontend"].completed, 1);
    assert_eq!(groups["frontend"].failed, 1);
    assert_eq!(report.layers[0].completed, 4);
}

/// Test: Report keeps final task states
/// Given several independent tasks
/// When they run
/// Then every task in the report is completed
#[tokio::test(start_paused = true)]
async fn test_report_task_states() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 3).await;

    let report = orch
        .run(independent_tasks(5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tasks.len(), 5);
    for task in &report.tasks {
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }
    let t3 = report.task(&TaskId::from("t3")).unwrap();
    assert_eq!(t3.status, TaskStatus::Completed);
}
