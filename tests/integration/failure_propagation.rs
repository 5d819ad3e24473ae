//! Failure propagation tests.
//!
//! A failed or unassignable task blocks everything downstream of it while
//! independent work keeps running.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hive::core::{TaskId, TaskStatus};
use hive::orchestration::{RuntimeError, UnassignedReason};

use crate::fixtures::{orchestrator, spawn, task, ScriptedRuntime};

/// Test: Failure blocks dependents only
/// Given A -> B -> C and an independent X
/// When A fails permanently
/// Then B and C are blocked and X still completes
#[tokio::test(start_paused = true)]
async fn test_failure_blocks_transitive_dependents() {
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.break_task("A");
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 2).await;

    let tasks = vec![
        task("A"),
        task("B").depends_on(["A"]),
        task("C").depends_on(["B"]),
        task("X"),
    ];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec![TaskId::from("X")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].task_id.as_str(), "A");
    assert!(report.failed[0].error.contains("A is broken"));

    let blocked: Vec<&str> = report.blocked.iter().map(|b| b.task_id.as_str()).collect();
    assert_eq!(blocked, vec!["B", "C"]);
    assert_eq!(report.blocked[0].reason, "dependency A did not complete");
    assert_eq!(report.blocked[1].reason, "dependency B did not complete");

    // Neither dependent ever reached the runtime.
    assert_eq!(runtime.started().len(), 2);
    assert_eq!(runtime.dispatch_calls(), 2, "permanent errors are not retried");
}

/// Test: Retry recovers a flaky task
/// Given a task that fails once with a transient error
/// When it runs
/// Then it is retried and completes
#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried() {
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.fail_dispatch("flaky", 1, RuntimeError::retryable("timeout"));
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 1).await;

    let report = orch
        .run(vec![task("flaky"), task("after").depends_on(["flaky"])], CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(runtime.dispatch_calls(), 3);
    assert_eq!(runtime.started(), vec!["flaky", "flaky", "after"]);
}

/// Test: Retries exhausted
/// Given a task whose dispatch always times out
/// When it runs with the default three attempts
/// Then it fails with a retry-exhausted error
#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_fails_task() {
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.fail_dispatch("stuck", 10, RuntimeError::retryable("timeout"));
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &[], 1).await;

    let report = orch
        .run(vec![task("stuck")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(runtime.dispatch_calls(), 3);
    assert_eq!(report.failed.len(), 1);
    let error = &report.failed[0].error;
    assert!(error.contains("3 attempts"), "unexpected error: {error}");
    assert!(error.contains("timeout"));
}

/// Test: No capable agent
/// Given a task needing "gpu" that no agent covers, and a dependent
/// When the set runs
/// Then the task is unassigned and its dependent blocked
#[tokio::test(start_paused = true)]
async fn test_no_capable_agent() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &["rust"], 2).await;

    let tasks = vec![
        task("train").requires(["gpu"]),
        task("deploy").depends_on(["train"]),
        task("build").requires(["rust"]),
    ];
    let report = orch.run(tasks, CancellationToken::new()).await.unwrap();

    assert_eq!(report.succeeded, vec![TaskId::from("build")]);
    assert_eq!(report.unassigned.len(), 1);
    assert_eq!(report.unassigned[0].task_id.as_str(), "train");
    assert_eq!(report.unassigned[0].reason, UnassignedReason::NoCapableAgent);

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].task_id.as_str(), "deploy");

    let train = report.task(&TaskId::from("train")).unwrap();
    assert!(matches!(train.status, TaskStatus::Blocked { .. }));
}

/// Test: Partial capability match
/// Given an agent covering half of a task's requirements
/// When the task runs
/// Then the agent still takes it
#[tokio::test(start_paused = true)]
async fn test_partial_match_is_viable() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);
    spawn(&orch, "dev-1", &["rust"], 1).await;

    let report = orch
        .run(vec![task("full-stack").requires(["rust", "react"])], CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
}

/// Test: Empty pool
/// Given no agents at all
/// When a task runs
/// Then it is unassigned rather than waiting forever
#[tokio::test(start_paused = true)]
async fn test_empty_pool() {
    let runtime = Arc::new(ScriptedRuntime::new());
    let orch = orchestrator(&runtime);

    let report = orch
        .run(vec![task("lonely")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.unassigned.len(), 1);
    assert_eq!(report.unassigned[0].reason, UnassignedReason::NoCapableAgent);
    assert_eq!(runtime.dispatch_calls(), 0);
}
