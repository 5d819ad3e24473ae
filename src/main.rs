use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use hive::config::Config;
use hive::core::{Agent, AgentConfig, ExecutionLayer, Task, TaskDependencyGraph, TaskId};
use hive::orchestration::{
    AgentPool, CapabilityMatcher, EventBus, SchedulingResult, TaskScheduler, UnassignedReason,
};
use hive::{Error, Result};

/// Hive - dependency-aware task scheduler for pools of agents
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HIVE_DEBUG=1    Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.hive/hive.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check a task file and print its execution layers
    Validate {
        /// TOML file with [[task]] entries
        tasks: PathBuf,
    },

    /// Dry-run assignment of a task file onto a set of agents
    Plan {
        /// TOML file with [[task]] entries
        tasks: PathBuf,

        /// TOML file with [[agent]] entries
        #[arg(long, short = 'a')]
        agents: PathBuf,
    },

    /// Show agent counts and capacity
    Stats {
        /// TOML file with [[agent]] entries
        #[arg(long, short = 'a')]
        agents: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default, rename = "task")]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct AgentFile {
    #[serde(default, rename = "agent")]
    agents: Vec<AgentConfig>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    hive::log::init_stderr(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Validate { tasks } => run_validate(&tasks),
        Command::Plan { tasks, agents } => run_plan(&config, &tasks, &agents),
        Command::Stats { agents } => run_stats(&agents),
    }
}

fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let file: TaskFile = toml::from_str(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), count = file.tasks.len(), "tasks loaded");
    Ok(file.tasks)
}

fn load_pool(path: &Path) -> Result<AgentPool> {
    let file: AgentFile = toml::from_str(&fs::read_to_string(path)?)?;
    let pool = AgentPool::new(Arc::new(EventBus::new()));
    for config in &file.agents {
        config.validate()?;
        pool.add_agent(Agent::from_config(config))?;
    }
    info!(path = %path.display(), count = pool.len(), "agents loaded");
    Ok(pool)
}

fn build_layers(tasks: Vec<Task>) -> Result<Vec<ExecutionLayer>> {
    match TaskDependencyGraph::build(tasks) {
        Err(Error::DependencyCycle { remaining, cycles }) => {
            eprintln!("Dependency cycle detected.");
            for cycle in &cycles {
                let ids: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
                eprintln!("  cycle: {}", ids.join(" -> "));
            }
            Err(Error::DependencyCycle { remaining, cycles })
        }
        other => other,
    }
}

fn run_validate(tasks: &Path) -> Result<()> {
    let layers = build_layers(load_tasks(tasks)?)?;
    let total: usize = layers.iter().map(|l| l.len()).sum();

    println!();
    println!("  Tasks:   {}", total);
    println!("  Layers:  {}", layers.len());
    println!();
    for layer in &layers {
        println!("  Layer {}", layer.index);
        for task in &layer.tasks {
            let group = task
                .parallel_group
                .as_deref()
                .map(|g| format!(" [{}]", g))
                .unwrap_or_default();
            println!(
                "    {:<16} {:<9} {}{}",
                task.id.as_str(),
                task.priority.to_string(),
                task.title,
                group
            );
        }
    }
    println!();
    Ok(())
}

/// Dry-run result for one layer.
struct LayerPlan {
    index: usize,
    result: SchedulingResult,
    /// Tasks skipped because a dependency will not complete: (task, dependency).
    blocked: Vec<(TaskId, TaskId)>,
}

/// Plan every layer against `pool` as if each assignment succeeds.
///
/// Tasks that end up unassigned poison their dependents in later layers,
/// which are blocked instead of planned.
fn plan_layers(
    scheduler: &TaskScheduler,
    pool: &AgentPool,
    layers: &mut [ExecutionLayer],
) -> Vec<LayerPlan> {
    let matcher = CapabilityMatcher::new();
    let mut poisoned: HashSet<TaskId> = HashSet::new();
    let mut plans = Vec::with_capacity(layers.len());

    for layer in layers.iter_mut() {
        let mut blocked = Vec::new();
        for task in layer.tasks.iter_mut() {
            if let Some(dep) = task.depends_on.iter().find(|d| poisoned.contains(*d)).cloned() {
                task.block(&format!("dependency {dep} did not complete"));
                blocked.push((task.id.clone(), dep));
            }
        }

        let result = scheduler.plan_layer(layer, pool, &matcher, &[]);

        // A capacity miss only waits when something in the layer got a slot.
        let waits = !result.assignments.is_empty();
        poisoned.extend(
            result
                .unassigned
                .iter()
                .filter(|m| m.reason == UnassignedReason::NoCapableAgent || !waits)
                .map(|m| m.task_id.clone()),
        );
        poisoned.extend(blocked.iter().map(|(id, _)| id.clone()));

        // Every assignment is assumed to finish before the next layer.
        for assignment in &result.assignments {
            pool.release(assignment.agent_id, &assignment.task_id);
        }
        plans.push(LayerPlan {
            index: layer.index,
            result,
            blocked,
        });
    }
    plans
}

fn run_plan(config: &Config, tasks: &Path, agents: &Path) -> Result<()> {
    let mut layers = build_layers(load_tasks(tasks)?)?;
    let pool = load_pool(agents)?;
    let scheduler = TaskScheduler::new(config.scheduler.clone());

    println!();
    for plan in plan_layers(&scheduler, &pool, &mut layers) {
        println!("  Layer {}", plan.index);
        for assignment in &plan.result.assignments {
            let name = pool
                .get(assignment.agent_id)
                .map(|a| a.name)
                .unwrap_or_else(|| assignment.agent_id.short());
            println!(
                "    {:<16} -> {:<16} score {:.2} (capability {:.2}, workload {:.2})",
                assignment.task_id.as_str(),
                name,
                assignment.score,
                assignment.criteria.capability,
                assignment.criteria.workload
            );
        }
        for task_id in &plan.result.deferred {
            println!("    {:<16} -- waits for a free slot", task_id.as_str());
        }
        for miss in &plan.result.unassigned {
            println!("    {:<16} !! unassigned: {}", miss.task_id.as_str(), miss.reason);
        }
        for (task_id, dep) in &plan.blocked {
            println!(
                "    {:<16} !! blocked: dependency {} did not complete",
                task_id.as_str(),
                dep.as_str()
            );
        }
    }
    println!();
    Ok(())
}

fn run_stats(agents: &Path) -> Result<()> {
    let pool = load_pool(agents)?;
    let stats = pool.stats();

    println!();
    println!(
        "  Agents:  {} total, {} idle, {} working, {} error, {} offline",
        stats.total, stats.idle, stats.working, stats.error, stats.offline
    );
    println!("  Slots:   {}", pool.total_capacity());
    println!();
    for agent in pool.agents() {
        let capacity = pool.capacity(agent.id)?;
        let caps: Vec<&str> = agent.capabilities.iter().map(String::as_str).collect();
        println!(
            "    {:<16} {:<10} {}/{}  {}",
            agent.name,
            agent.category.to_string(),
            capacity.current_load,
            capacity.max_capacity,
            caps.join(", ")
        );
    }
    println!();
    Ok(())
}
