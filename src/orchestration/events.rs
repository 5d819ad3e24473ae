//! Orchestrator event stream.
//!
//! Observers register with [`EventBus::subscribe`] and receive every event
//! published afterwards. Delivery is at-least-once per live subscriber.
//! Events are not ordered across agents, but all events about one agent are
//! published while the agent pool lock is held, so each subscriber sees them
//! in the order they happened.

use crate::core::agent::{AgentId, AgentStatus};
use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    AgentCreated,
    AgentRemoved,
    AgentStatusChanged,
    TaskAssigned,
    TaskCompleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::AgentCreated => write!(f, "AGENT_CREATED"),
            EventType::AgentRemoved => write!(f, "AGENT_REMOVED"),
            EventType::AgentStatusChanged => write!(f, "AGENT_STATUS_CHANGED"),
            EventType::TaskAssigned => write!(f, "TASK_ASSIGNED"),
            EventType::TaskCompleted => write!(f, "TASK_COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventPayload {
    AgentCreated {
        agent_id: AgentId,
        name: String,
    },
    AgentRemoved {
        agent_id: AgentId,
    },
    AgentStatusChanged {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },
    TaskAssigned {
        task_id: TaskId,
        agent_id: AgentId,
        score: f64,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: AgentId,
        /// False when the task ended in failure.
        success: bool,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::AgentCreated { .. } => EventType::AgentCreated,
            EventPayload::AgentRemoved { .. } => EventType::AgentRemoved,
            EventPayload::AgentStatusChanged { .. } => EventType::AgentStatusChanged,
            EventPayload::TaskAssigned { .. } => EventType::TaskAssigned,
            EventPayload::TaskCompleted { .. } => EventType::TaskCompleted,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        match self {
            EventPayload::AgentCreated { agent_id, .. }
            | EventPayload::AgentRemoved { agent_id }
            | EventPayload::AgentStatusChanged { agent_id, .. }
            | EventPayload::TaskAssigned { agent_id, .. }
            | EventPayload::TaskCompleted { agent_id, .. } => *agent_id,
        }
    }
}

/// A `(type, payload, timestamp)` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl OrchestratorEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_type: payload.event_type(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Observer registry backed by unbounded channels, so publishing never
/// blocks the caller.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<OrchestratorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send to every live subscriber and drop the ones that hung up.
    pub fn publish(&self, payload: EventPayload) {
        let event = OrchestratorEvent::new(payload);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
