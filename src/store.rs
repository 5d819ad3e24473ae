//! Agent persistence.
//!
//! The orchestrator restores agents from an `AgentStore` on startup and
//! checkpoints them after spawns, removals and each layer's assignments.

use crate::config::Config;
use crate::core::agent::Agent;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn load_agents(&self) -> Result<Vec<Agent>>;
    async fn save_agents(&self, agents: &[Agent]) -> Result<()>;
}

/// Save `agents`, logging a failure instead of returning it.
pub async fn checkpoint(store: &dyn AgentStore, agents: &[Agent]) {
    if let Err(e) = store.save_agents(agents).await {
        warn!(error = %e, agents = agents.len(), "agent checkpoint failed");
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentFile {
    #[serde(default)]
    agents: Vec<Agent>,
}

/// Stores agents as pretty JSON in a single file.
///
/// Writes go to `<file>.tmp` and are renamed over the target, keeping the
/// previous contents in `<file>.bak`.
#[derive(Debug, Clone)]
pub struct JsonAgentStore {
    path: PathBuf,
}

impl JsonAgentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.hive/agents.json`.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::agents_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AgentStore for JsonAgentStore {
    async fn load_agents(&self) -> Result<Vec<Agent>> {
        debug!(path = %self.path.display(), "loading agents");
        if !fs::try_exists(&self.path).await? {
            debug!("agent file not found, starting empty");
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        let file: AgentFile = serde_json::from_str(&contents)?;
        debug!(count = file.agents.len(), "agents loaded");
        Ok(file.agents)
    }

    async fn save_agents(&self, agents: &[Agent]) -> Result<()> {
        let contents = serde_json::to_string_pretty(&AgentFile {
            agents: agents.to_vec(),
        })?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        if fs::try_exists(&self.path).await? {
            fs::copy(&self.path, self.path.with_extension("json.bak")).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).await?;
        fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), count = agents.len(), "agents saved");
        Ok(())
    }
}
