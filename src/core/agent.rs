//! Agent data model.
//!
//! An `Agent` is a worker with a set of capabilities and a bounded number of
//! concurrent task slots. Agents are built from an `AgentConfig` (the output
//! of request resolution) and are owned by the `AgentPool` once registered.

use crate::core::task::Priority;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use uuid::Uuid;

/// Longest accepted agent name, in characters.
pub const MAX_AGENT_NAME_LEN: usize = 64;

static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.\-]*$").expect("static agent name pattern")
    })
}

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Error,
    Offline,
}

impl AgentStatus {
    /// Idle and working agents may take more tasks; errored or offline ones
    /// may not.
    pub fn accepts_work(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Working)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// The kind of agent. Each category brings a default capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Developer,
    Architect,
    Quality,
    Process,
}

impl AgentCategory {
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentCategory::Developer => &["code", "debug", "refactor"],
            AgentCategory::Architect => &["design", "review", "planning"],
            AgentCategory::Quality => &["test", "review", "security"],
            AgentCategory::Process => &["docs", "release", "planning"],
        }
    }
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentCategory::Developer => write!(f, "developer"),
            AgentCategory::Architect => write!(f, "architect"),
            AgentCategory::Quality => write!(f, "quality"),
            AgentCategory::Process => write!(f, "process"),
        }
    }
}

/// Expected difficulty of the work an agent is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Heavier work gets fewer concurrent slots.
    pub fn default_capacity(&self) -> u32 {
        match self {
            Complexity::Low => 3,
            Complexity::Medium => 2,
            Complexity::High => 1,
        }
    }
}

/// Resolved description of an agent to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub category: AgentCategory,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub priority: Priority,
    /// Capabilities on top of the category defaults.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Overrides the complexity-derived capacity.
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

impl AgentConfig {
    pub fn new(name: &str, category: AgentCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            complexity: Complexity::default(),
            priority: Priority::default(),
            capabilities: BTreeSet::new(),
            max_capacity: None,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_max_capacity(mut self, max: u32) -> Self {
        self.max_capacity = Some(max);
        self
    }

    /// Category defaults merged with the explicit capabilities.
    pub fn effective_capabilities(&self) -> BTreeSet<String> {
        let mut caps: BTreeSet<String> = self
            .category
            .default_capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect();
        caps.extend(self.capabilities.iter().cloned());
        caps
    }

    pub fn effective_capacity(&self) -> u32 {
        self.max_capacity
            .unwrap_or_else(|| self.complexity.default_capacity())
    }

    /// Check the config can produce an agent.
    ///
    /// # Errors
    /// Returns `Error::AgentSpawn` for empty, oversized or malformed names
    /// and for a zero capacity.
    pub fn validate(&self) -> Result<()> {
        validate_agent_name(&self.name)?;
        if self.effective_capacity() == 0 {
            return Err(Error::AgentSpawn(format!(
                "agent '{}' must have a capacity of at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// Validate an agent name.
pub fn validate_agent_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::AgentSpawn("agent name is empty".to_string()));
    }
    if name.chars().count() > MAX_AGENT_NAME_LEN {
        return Err(Error::AgentSpawn(format!(
            "agent name exceeds {} characters",
            MAX_AGENT_NAME_LEN
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(Error::AgentSpawn(format!(
            "agent name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

/// A worker that can take tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub category: AgentCategory,
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub current_load: u32,
    pub max_capacity: u32,
}

impl Agent {
    /// Build an idle, unloaded agent from a config.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_id(AgentId::new(), config)
    }

    /// Same as `from_config`, keeping an id chosen by the caller.
    pub fn with_id(id: AgentId, config: &AgentConfig) -> Self {
        Self {
            id,
            name: config.name.clone(),
            category: config.category,
            capabilities: config.effective_capabilities(),
            status: AgentStatus::Idle,
            current_load: 0,
            max_capacity: config.effective_capacity(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_capacity
    }

    /// Ready to accept another task right now.
    pub fn is_available(&self) -> bool {
        self.status.accepts_work() && self.has_capacity()
    }

    /// Fraction of free slots, in `[0, 1]`.
    pub fn free_ratio(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        1.0 - (self.current_load as f64 / self.max_capacity as f64).min(1.0)
    }
}
