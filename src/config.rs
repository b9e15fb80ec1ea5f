use crate::agents::retry::RetryPolicy;
use crate::domain::types::AgentKind;
use crate::planning_paths::StoragePaths;
use crate::preferences::DelayBounds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub agents: AgentCommands,
    /// Retry and timeout envelope applied to every agent call.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Allowed range for the auto-continue delay in preference records.
    #[serde(default)]
    pub auto_continue_bounds: DelayBounds,
    /// Root of all persisted state. Defaults to `~/.weekplan`.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// Whether per-session structured logs are written.
    #[serde(default = "default_logs")]
    pub logs: bool,
}

fn default_logs() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AgentCommandConfig {
    fn claude() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
        }
    }
}

/// CLI command used for each agent role.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentCommands {
    pub organizing: AgentCommandConfig,
    pub selection: AgentCommandConfig,
    pub editing: AgentCommandConfig,
}

impl Default for AgentCommands {
    fn default() -> Self {
        Self {
            organizing: AgentCommandConfig::claude(),
            selection: AgentCommandConfig::claude(),
            editing: AgentCommandConfig::claude(),
        }
    }
}

impl AgentCommands {
    pub fn for_agent(&self, agent: AgentKind) -> &AgentCommandConfig {
        match agent {
            AgentKind::Organizing => &self.organizing,
            AgentKind::Selection => &self.selection,
            AgentKind::Editing => &self.editing,
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration embedded in the binary.
    pub fn default_config() -> Result<Self> {
        const DEFAULT_CONFIG_YAML: &str = include_str!("../weekplan.yaml");

        let config: Self = serde_yaml::from_str(DEFAULT_CONFIG_YAML)
            .context("Failed to parse embedded weekplan.yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise the embedded default.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::default_config(),
        }
    }

    fn validate(&self) -> Result<()> {
        self.retry.validate()?;

        let bounds = self.auto_continue_bounds;
        if bounds.min_secs == 0 || bounds.min_secs > bounds.max_secs {
            anyhow::bail!(
                "auto_continue_bounds must satisfy 0 < min_secs <= max_secs, got [{}, {}]",
                bounds.min_secs,
                bounds.max_secs
            );
        }

        for agent in [AgentKind::Organizing, AgentKind::Selection, AgentKind::Editing] {
            if self.agents.for_agent(agent).command.trim().is_empty() {
                anyhow::bail!("Agent '{}' has an empty command", agent);
            }
        }
        Ok(())
    }

    /// Resolves the storage layout, creating directories as needed.
    pub fn storage_paths(&self) -> Result<StoragePaths> {
        match &self.storage_dir {
            Some(dir) => StoragePaths::at(dir.clone()),
            None => StoragePaths::home(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agents: AgentCommands::default(),
            retry: RetryPolicy::default(),
            auto_continue_bounds: DelayBounds::default(),
            storage_dir: None,
            logs: default_logs(),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
