//! YAML configuration for agents, models, and commands.
//!
//! Schema validation and file-format versioning are deliberately minimal;
//! this is just enough structure for the runtime to be assembled from a
//! file. Unknown keys are ignored.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agent::{Agent, DEFAULT_MAX_ITERATIONS};
use crate::ai::adapter::ThinkingBudget;
use crate::ai::router::ModelConfig;
use crate::tools::shell::ShellConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub commands: HashMap<String, String>,
    #[serde(default)]
    pub shell: ShellConfig,
    /// MCP servers to connect, name -> base URL.
    #[serde(default)]
    pub mcp_servers: HashMap<String, String>,
    /// Language server command (argv) for the LSP proxy tool.
    #[serde(default)]
    pub lsp_server: Vec<String>,
    /// Files whose contents seed the RAG knowledge base.
    #[serde(default)]
    pub knowledge_files: Vec<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub toolsets: Vec<String>,
    #[serde(default)]
    pub sub_agents: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub structured_output: Option<serde_json::Value>,
    #[serde(default)]
    pub thinking_budget: Option<ThinkingBudget>,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl Config {
    /// The user-level config location, used when no path is given.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|d| d.join("cagent").join("cagent.yaml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, agent) in &self.agents {
            if !self.models.contains_key(&agent.model) {
                anyhow::bail!("agent '{name}' references unknown model '{}'", agent.model);
            }
            for sub in &agent.sub_agents {
                if !self.agents.contains_key(sub) {
                    anyhow::bail!("agent '{name}' references unknown sub-agent '{sub}'");
                }
            }
        }
        for (name, model) in &self.models {
            for rule in &model.routing {
                if !self.models.contains_key(&rule.model) {
                    anyhow::bail!("model '{name}' routes to unknown model '{}'", rule.model);
                }
            }
        }
        Ok(())
    }

    /// Materialize the agent definitions.
    pub fn agents(&self) -> Vec<Agent> {
        self.agents
            .iter()
            .map(|(name, cfg)| Agent {
                name: name.clone(),
                instruction: cfg.instruction.clone(),
                model: cfg.model.clone(),
                toolsets: cfg.toolsets.clone(),
                sub_agents: cfg.sub_agents.clone(),
                max_iterations: cfg.max_iterations,
                structured_output: cfg.structured_output.clone(),
                thinking_budget: cfg.thinking_budget,
            })
            .collect()
    }

    /// The root agent: `root` if present, otherwise the only agent.
    pub fn root_agent(&self) -> Option<&str> {
        if self.agents.contains_key("root") {
            return Some("root");
        }
        if self.agents.len() == 1 {
            return self.agents.keys().next().map(String::as_str);
        }
        None
    }
}
