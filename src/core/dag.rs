//! Task dependency graph.
//!
//! `TaskDependencyGraph` holds a submitted task set as a petgraph `DiGraph`
//! with an edge `dependency -> dependent` for every `depends_on` entry, and
//! peels it into execution layers with Kahn's algorithm. Every task in a layer
//! has all of its dependencies in earlier layers, so a layer can run in
//! parallel once the layers before it have resolved.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// A set of tasks with no dependency edges among them.
///
/// Tasks are ordered by priority (highest first), then by submission order.
/// The order is a scheduling preference only.
#[derive(Debug, Clone)]
pub struct ExecutionLayer {
    /// Position of this layer in the run, starting at 0.
    pub index: usize,
    pub tasks: Vec<Task>,
}

impl ExecutionLayer {
    pub fn new(index: usize, tasks: Vec<Task>) -> Self {
        Self { index, tasks }
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|t| &t.id == id)
    }

    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// A layer is resolved once every task is completed, failed or blocked.
    pub fn is_resolved(&self) -> bool {
        self.tasks.iter().all(Task::is_resolved)
    }
}

/// The dependency graph for one submitted task set.
pub struct TaskDependencyGraph {
    /// Node weights are tasks; node indices follow submission order.
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskDependencyGraph {
    /// Validate and layer a task set in one step.
    ///
    /// An empty task set yields zero layers.
    ///
    /// # Errors
    /// `DuplicateTask` or `UnknownDependency` for malformed input, and
    /// `DependencyCycle` naming the tasks that could not be layered.
    pub fn build(tasks: Vec<Task>) -> Result<Vec<ExecutionLayer>> {
        Self::from_tasks(tasks)?.layers()
    }

    /// Construct the graph, checking ids are unique and every dependency
    /// references a task in the same set.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut task_index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if task_index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id));
            }
            let id = task.id.clone();
            let index = graph.add_node(task);
            task_index.insert(id, index);
        }

        let mut edges = Vec::new();
        for index in graph.node_indices() {
            let task = &graph[index];
            for dep in &task.depends_on {
                let dep_index =
                    task_index
                        .get(dep)
                        .copied()
                        .ok_or_else(|| Error::UnknownDependency {
                            task: task.id.clone(),
                            missing: dep.clone(),
                        })?;
                edges.push((dep_index, index));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        debug!(
            tasks = graph.node_count(),
            dependencies = graph.edge_count(),
            "dependency graph built"
        );

        Ok(Self { graph, task_index })
    }

    /// Peel the graph into execution layers (Kahn's algorithm).
    ///
    /// Each layer is exactly the set of tasks whose in-degree drops to zero
    /// at that peel step.
    pub fn layers(&self) -> Result<Vec<ExecutionLayer>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut current: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut layers = Vec::new();
        let mut peeled = 0usize;

        while !current.is_empty() {
            current.sort_by_key(|n| (Reverse(self.graph[*n].priority), n.index()));
            peeled += current.len();

            let mut next = Vec::new();
            for &node in &current {
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let degree = &mut in_degree[dependent.index()];
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }

            let tasks = current.iter().map(|n| self.graph[*n].clone()).collect();
            layers.push(ExecutionLayer::new(layers.len(), tasks));
            current = next;
        }

        if peeled < self.graph.node_count() {
            let remaining: Vec<TaskId> = self
                .graph
                .node_indices()
                .filter(|n| in_degree[n.index()] > 0)
                .map(|n| self.graph[n].id.clone())
                .collect();
            let cycles = self.cycles();
            debug!(
                remaining = remaining.len(),
                cycles = cycles.len(),
                "dependency cycle detected"
            );
            return Err(Error::DependencyCycle { remaining, cycles });
        }

        Ok(layers)
    }

    /// Strongly connected components that form a cycle, each listed in
    /// submission order.
    fn cycles(&self) -> Vec<Vec<TaskId>> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n))
            })
            .collect();
        for scc in &mut cycles {
            scc.sort_by_key(|n| n.index());
        }
        cycles.sort_by_key(|scc| scc.first().map(|n| n.index()));
        cycles
            .into_iter()
            .map(|scc| scc.into_iter().map(|n| self.graph[n].id.clone()).collect())
            .collect()
    }

    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Tasks the given task depends on directly.
    pub fn get_dependencies(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that depend directly on the given task.
    pub fn get_dependents(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&Task> {
        match self.task_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every task that (transitively) depends on the given task.
    pub fn transitive_dependents(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let Some(&start) = self.task_index.get(id) else {
            return seen;
        };
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if seen.insert(self.graph[dependent].id.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        seen
    }

    /// All tasks in a valid topological order (layers concatenated).
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        Ok(self
            .layers()?
            .into_iter()
            .flat_map(|layer| layer.tasks.into_iter().map(|t| t.id))
            .collect())
    }
}

impl std::fmt::Debug for TaskDependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
