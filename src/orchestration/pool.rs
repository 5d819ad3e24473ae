//! Agent pool for multi-agent management.
//!
//! The `AgentPool` owns every live [`Agent`], tracks which tasks each agent
//! holds, and enforces `current_load <= max_capacity`. All mutation goes
//! through one mutex, so `reserve` and `release` are atomic with respect to
//! concurrent dispatches inside a layer. Events about an agent are published
//! while that lock is held, which keeps them totally ordered per agent.

use crate::core::agent::{Agent, AgentId, AgentStatus};
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::events::{EventBus, EventPayload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Agent counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total: usize,
    pub idle: usize,
    pub working: usize,
    pub error: usize,
    pub offline: usize,
}

/// Capacity view of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapacity {
    pub current_load: u32,
    pub max_capacity: u32,
    pub is_available: bool,
}

#[derive(Debug)]
struct AgentSlot {
    agent: Agent,
    /// Tasks currently reserved on this agent. `agent.current_load` always
    /// equals `active.len()`.
    active: HashSet<TaskId>,
    /// Registration sequence, used to list agents in a stable order.
    seq: u64,
}

#[derive(Debug, Default)]
struct PoolInner {
    slots: HashMap<AgentId, AgentSlot>,
    next_seq: u64,
}

/// Manages the set of agents and their task reservations.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use hive::orchestration::{AgentPool, EventBus};
///
/// let pool = AgentPool::new(Arc::new(EventBus::new()));
/// assert!(pool.is_empty());
/// assert_eq!(pool.total_load(), 0);
/// ```
#[derive(Debug)]
pub struct AgentPool {
    inner: Mutex<PoolInner>,
    events: Arc<EventBus>,
}

impl AgentPool {
    /// Create an empty pool publishing to `events`.
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            events,
        }
    }

    /// The bus this pool publishes agent events on.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Register an agent. Its load is reset to zero since a freshly
    /// registered agent holds no reservations.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if an agent with the same id is already
    /// registered.
    pub fn add_agent(&self, mut agent: Agent) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&agent.id) {
            return Err(Error::Validation(format!(
                "agent {} is already registered",
                agent.id
            )));
        }

        agent.current_load = 0;
        if agent.status == AgentStatus::Working {
            agent.status = AgentStatus::Idle;
        }
        let id = agent.id;
        let name = agent.name.clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            id,
            AgentSlot {
                agent,
                active: HashSet::new(),
                seq,
            },
        );

        info!(agent_id = %id, name = %name, "agent registered");
        self.events
            .publish(EventPayload::AgentCreated { agent_id: id, name });
        Ok(())
    }

    /// Remove an agent and return it. Reservations it still held are
    /// discarded; later releases for them are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no such agent exists.
    pub fn remove_agent(&self, id: AgentId) -> Result<Agent> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .remove(&id)
            .ok_or(Error::AgentNotFound { id })?;

        if !slot.active.is_empty() {
            debug!(agent_id = %id, held = slot.active.len(), "removed agent still held tasks");
        }
        info!(agent_id = %id, "agent removed");
        self.events
            .publish(EventPayload::AgentRemoved { agent_id: id });
        Ok(slot.agent)
    }

    /// Set an agent's status, emitting a change event when it differs.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no such agent exists.
    pub fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .get_mut(&id)
            .ok_or(Error::AgentNotFound { id })?;
        self.transition(slot, status);
        Ok(())
    }

    /// Agents that accept work and have a free slot, in registration order.
    ///
    /// This includes `Working` agents below `max_capacity`, not only `Idle`
    /// ones, so an agent with several slots can take more than one task.
    /// `Error` and `Offline` agents are never listed.
    pub fn available_agents(&self) -> Vec<Agent> {
        let inner = self.inner.lock();
        let mut slots: Vec<&AgentSlot> = inner
            .slots
            .values()
            .filter(|s| s.agent.is_available())
            .collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| s.agent.clone()).collect()
    }

    /// Atomically take one slot on `agent_id` for `task_id`.
    ///
    /// Reserving a task the agent already holds is a no-op.
    ///
    /// # Errors
    ///
    /// - `Error::AgentNotFound` if the agent does not exist
    /// - `Error::AgentUnavailable` if its status does not accept work
    /// - `Error::CapacityExceeded` if every slot is taken
    pub fn reserve(&self, agent_id: AgentId, task_id: &TaskId) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .get_mut(&agent_id)
            .ok_or(Error::AgentNotFound { id: agent_id })?;

        if slot.active.contains(task_id) {
            return Ok(());
        }
        if !slot.agent.status.accepts_work() {
            return Err(Error::AgentUnavailable {
                id: agent_id,
                status: slot.agent.status,
            });
        }
        if !slot.agent.has_capacity() {
            return Err(Error::CapacityExceeded {
                agent_id,
                current_load: slot.agent.current_load,
                max_capacity: slot.agent.max_capacity,
            });
        }

        slot.active.insert(task_id.clone());
        slot.agent.current_load += 1;
        debug!(
            agent_id = %agent_id,
            task_id = %task_id,
            load = slot.agent.current_load,
            max = slot.agent.max_capacity,
            "slot reserved"
        );
        if slot.agent.status == AgentStatus::Idle {
            self.transition(slot, AgentStatus::Working);
        }
        Ok(())
    }

    /// Publish `TASK_ASSIGNED` for a reservation made by the scheduler.
    pub fn record_assignment(&self, agent_id: AgentId, task_id: &TaskId, score: f64) {
        let _inner = self.inner.lock();
        self.events.publish(EventPayload::TaskAssigned {
            task_id: task_id.clone(),
            agent_id,
            score,
        });
    }

    /// Give back the slot `task_id` holds on `agent_id`.
    ///
    /// Idempotent per `(agent_id, task_id)`: releasing a pair that is not
    /// reserved, or an agent that no longer exists, does nothing.
    pub fn release(&self, agent_id: AgentId, task_id: &TaskId) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(&agent_id) {
            self.release_slot(slot, task_id);
        }
    }

    /// Publish `TASK_COMPLETED` and release the slot under one lock.
    ///
    /// Returns false if the pair was not reserved, in which case no event is
    /// published.
    pub fn complete_task(&self, agent_id: AgentId, task_id: &TaskId, success: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(&agent_id) else {
            return false;
        };
        if !slot.active.contains(task_id) {
            return false;
        }
        self.events.publish(EventPayload::TaskCompleted {
            task_id: task_id.clone(),
            agent_id,
            success,
        });
        self.release_slot(slot, task_id);
        true
    }

    fn release_slot(&self, slot: &mut AgentSlot, task_id: &TaskId) {
        if !slot.active.remove(task_id) {
            return;
        }
        slot.agent.current_load = slot.agent.current_load.saturating_sub(1);
        debug!(
            agent_id = %slot.agent.id,
            task_id = %task_id,
            load = slot.agent.current_load,
            "slot released"
        );
        if slot.agent.current_load == 0 && slot.agent.status == AgentStatus::Working {
            self.transition(slot, AgentStatus::Idle);
        }
    }

    fn transition(&self, slot: &mut AgentSlot, to: AgentStatus) {
        let from = slot.agent.status;
        if from == to {
            return;
        }
        slot.agent.status = to;
        debug!(agent_id = %slot.agent.id, %from, %to, "agent status changed");
        self.events.publish(EventPayload::AgentStatusChanged {
            agent_id: slot.agent.id,
            from,
            to,
        });
    }

    pub fn get(&self, id: AgentId) -> Option<Agent> {
        self.inner.lock().slots.get(&id).map(|s| s.agent.clone())
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.inner.lock().slots.contains_key(&id)
    }

    /// Snapshot of every agent, in registration order.
    pub fn agents(&self) -> Vec<Agent> {
        let inner = self.inner.lock();
        let mut slots: Vec<&AgentSlot> = inner.slots.values().collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| s.agent.clone()).collect()
    }

    /// Tasks currently reserved on an agent.
    pub fn active_tasks(&self, id: AgentId) -> Vec<TaskId> {
        let inner = self.inner.lock();
        let mut tasks: Vec<TaskId> = inner
            .slots
            .get(&id)
            .map(|s| s.active.iter().cloned().collect())
            .unwrap_or_default();
        tasks.sort();
        tasks
    }

    pub fn stats(&self) -> AgentStats {
        let inner = self.inner.lock();
        let mut stats = AgentStats {
            total: inner.slots.len(),
            ..AgentStats::default()
        };
        for slot in inner.slots.values() {
            match slot.agent.status {
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Working => stats.working += 1,
                AgentStatus::Error => stats.error += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no such agent exists.
    pub fn capacity(&self, id: AgentId) -> Result<AgentCapacity> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(&id).ok_or(Error::AgentNotFound { id })?;
        Ok(AgentCapacity {
            current_load: slot.agent.current_load,
            max_capacity: slot.agent.max_capacity,
            is_available: slot.agent.is_available(),
        })
    }

    pub fn total_load(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .slots
            .values()
            .map(|s| u64::from(s.agent.current_load))
            .sum()
    }

    pub fn total_capacity(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .slots
            .values()
            .map(|s| u64::from(s.agent.max_capacity))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }
}
