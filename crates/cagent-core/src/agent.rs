//! Agent definitions.
//!
//! An [`Agent`] is immutable once a session starts: the runtime clones the
//! definition into the run and never reads the config again.

use serde_json::Value;

use crate::ai::adapter::ThinkingBudget;

/// Iterations allowed before the runtime asks the user to extend.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Extension granted per approved `MaxIterationsReached` decision.
pub const ITERATION_EXTENSION: usize = 10;

#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    /// System prompt for every model call this agent makes.
    pub instruction: String,
    /// Key into the session's model map.
    pub model: String,
    /// Tool names this agent may call. Empty means no tools.
    pub toolsets: Vec<String>,
    /// Agents this one may transfer work to.
    pub sub_agents: Vec<String>,
    pub max_iterations: usize,
    /// JSON schema the final answer must conform to.
    pub structured_output: Option<Value>,
    pub thinking_budget: Option<ThinkingBudget>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            model: model.into(),
            toolsets: Vec::new(),
            sub_agents: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            structured_output: None,
            thinking_budget: None,
        }
    }

    pub fn with_toolsets(mut self, toolsets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.toolsets = toolsets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sub_agents(mut self, agents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.toolsets.iter().any(|t| t == name)
    }

    pub fn can_transfer_to(&self, name: &str) -> bool {
        self.sub_agents.iter().any(|a| a == name)
    }
}
