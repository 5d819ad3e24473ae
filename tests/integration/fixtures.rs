//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted in-memory agent runtime
//! - An in-memory agent store
//! - Orchestrator construction with test-friendly config
//! - Predefined task sets

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use hive::config::Config;
use hive::core::{Agent, AgentCategory, AgentConfig, AgentId, Task};
use hive::orchestration::{
    AgentHandle, AgentRuntime, Orchestrator, OrchestratorEvent, RuntimeError, TaskOutput,
};
use hive::store::AgentStore;

/// Default time a dispatched task takes.
pub const TASK_TIME: Duration = Duration::from_millis(100);

/// A host runtime whose failures and timings are scripted per test.
pub struct ScriptedRuntime {
    delay: Duration,
    task_delays: Mutex<HashMap<String, Duration>>,
    /// Errors returned by successive dispatches of a task before it succeeds.
    dispatch_script: Mutex<HashMap<String, VecDeque<RuntimeError>>>,
    /// Tasks whose every dispatch fails permanently.
    broken_tasks: Mutex<HashSet<String>>,
    spawn_script: Mutex<VecDeque<RuntimeError>>,
    broken_attach: Mutex<HashSet<AgentId>>,
    spawn_calls: AtomicU32,
    dispatch_calls: AtomicU32,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    /// "start:<id>" / "end:<id>" in the order they happened.
    timeline: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::with_delay(TASK_TIME)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            task_delays: Mutex::new(HashMap::new()),
            dispatch_script: Mutex::new(HashMap::new()),
            broken_tasks: Mutex::new(HashSet::new()),
            spawn_script: Mutex::new(VecDeque::new()),
            broken_attach: Mutex::new(HashSet::new()),
            spawn_calls: AtomicU32::new(0),
            dispatch_calls: AtomicU32::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            timeline: Mutex::new(Vec::new()),
        }
    }

    pub fn task_delay(&self, task: &str, delay: Duration) {
        self.task_delays.lock().insert(task.to_string(), delay);
    }

    /// Fail the next `times` dispatches of `task` with `error`.
    pub fn fail_dispatch(&self, task: &str, times: usize, error: RuntimeError) {
        let mut script = self.dispatch_script.lock();
        let queue = script.entry(task.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    pub fn break_task(&self, task: &str) {
        self.broken_tasks.lock().insert(task.to_string());
    }

    /// Fail the next `times` spawns with `error`.
    pub fn fail_spawns(&self, times: usize, error: RuntimeError) {
        self.spawn_script
            .lock()
            .extend(std::iter::repeat(error).take(times));
    }

    pub fn break_attach(&self, id: AgentId) {
        self.broken_attach.lock().insert(id);
    }

    pub fn spawn_calls(&self) -> u32 {
        self.spawn_calls.load(Ordering::SeqCst)
    }

    pub fn dispatch_calls(&self) -> u32 {
        self.dispatch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of dispatches observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }

    /// True when `first` finished before `second` started.
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let timeline = self.timeline.lock();
        let end = timeline.iter().position(|e| *e == format!("end:{first}"));
        let start = timeline.iter().position(|e| *e == format!("start:{second}"));
        matches!((end, start), (Some(end), Some(start)) if end < start)
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn spawn(&self, agent_id: AgentId, config: &AgentConfig) -> Result<AgentHandle, RuntimeError> {
        self.spawn_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.spawn_script.lock().pop_front() {
            return Err(error);
        }
        Ok(AgentHandle::new(agent_id, format!("mock:{}", config.name)))
    }

    async fn attach(&self, agent_id: AgentId) -> Result<AgentHandle, RuntimeError> {
        if self.broken_attach.lock().contains(&agent_id) {
            return Err(RuntimeError::permanent("agent is gone"));
        }
        Ok(AgentHandle::new(agent_id, "mock:restored"))
    }

    async fn dispatch(&self, _handle: &AgentHandle, task: &Task) -> Result<TaskOutput, RuntimeError> {
        let id = task.id.to_string();
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(id.clone());
        self.timeline.lock().push(format!("start:{id}"));

        let delay = self
            .task_delays
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(self.delay);
        tokio::time::sleep(delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().push(id.clone());
        self.timeline.lock().push(format!("end:{id}"));

        if self.broken_tasks.lock().contains(&id) {
            return Err(RuntimeError::permanent(format!("{id} is broken")));
        }
        let scripted = self
            .dispatch_script
            .lock()
            .get_mut(&id)
            .and_then(|q| q.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        Ok(TaskOutput {
            task_id: task.id.clone(),
            summary: format!("{id} done"),
        })
    }
}

/// Agent store kept in memory. Every save is kept in order.
#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<Vec<Agent>>,
    history: Mutex<Vec<Vec<Agent>>>,
}

impl MemoryStore {
    pub fn with_agents(agents: Vec<Agent>) -> Self {
        Self {
            agents: Mutex::new(agents),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents.lock().clone()
    }

    pub fn saves(&self) -> usize {
        self.history.lock().len()
    }

    /// Total saved load, one entry per save.
    pub fn saved_loads(&self) -> Vec<u32> {
        self.history
            .lock()
            .iter()
            .map(|agents| agents.iter().map(|a| a.current_load).sum())
            .collect()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn load_agents(&self) -> hive::Result<Vec<Agent>> {
        Ok(self.agents.lock().clone())
    }

    async fn save_agents(&self, agents: &[Agent]) -> hive::Result<()> {
        *self.agents.lock() = agents.to_vec();
        self.history.lock().push(agents.to_vec());
        Ok(())
    }
}

/// Default config with jitter off so retry timing is exact.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.jitter_ms = 0;
    config
}

pub fn orchestrator(runtime: &Arc<ScriptedRuntime>) -> Orchestrator {
    orchestrator_with(test_config(), runtime)
}

pub fn orchestrator_with(config: Config, runtime: &Arc<ScriptedRuntime>) -> Orchestrator {
    let runtime: Arc<dyn AgentRuntime> = Arc::clone(runtime) as Arc<dyn AgentRuntime>;
    Orchestrator::new(config, runtime).expect("valid test config")
}

/// An agent config with exactly the given capabilities and capacity.
pub fn agent_config(name: &str, capabilities: &[&str], capacity: u32) -> AgentConfig {
    AgentConfig::new(name, AgentCategory::Developer)
        .with_capabilities(capabilities.iter().copied())
        .with_max_capacity(capacity)
}

pub async fn spawn(orch: &Orchestrator, name: &str, capabilities: &[&str], capacity: u32) -> AgentId {
    orch.spawn_agent(&agent_config(name, capabilities, capacity))
        .await
        .expect("spawn test agent")
}

pub fn task(id: &str) -> Task {
    Task::new(id, &format!("Task {id}"))
}

/// `n` tasks with no dependencies: t0, t1, ...
pub fn independent_tasks(count: usize) -> Vec<Task> {
    (0..count).map(|i| task(&format!("t{i}"))).collect()
}

/// A -> {B, C} -> D
pub fn diamond() -> Vec<Task> {
    vec![
        task("A"),
        task("B").depends_on(["A"]),
        task("C").depends_on(["A"]),
        task("D").depends_on(["B", "C"]),
    ]
}

/// Drain every event received so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
