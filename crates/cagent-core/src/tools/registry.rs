//! Tool registry: name resolution, descriptors, and guarded invocation.
//!
//! The registry owns every tool for the lifetime of a session. Whether a
//! call needs user confirmation is a property of the descriptor; the
//! confirmation gate decides whether to consult the user.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::tools::transfer;

/// Default tool execution timeout.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("tool execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// The tool's backing server wants the user to authorize first.
    #[error("authorization required by {server_url}")]
    OAuthRequired {
        server_url: String,
        server_type: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Context threaded through every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }
}

impl ToolContext {
    /// Resolve a path relative to the working directory; absolute paths pass
    /// through unchanged.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Everything the model (and the confirmation gate) needs to know about a
/// tool, minus the handler itself.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub schema: Value,
    pub requires_confirmation: bool,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Parse JSON-text arguments into a typed params struct.
pub fn parse_args<T: DeserializeOwned>(arguments: &str) -> Result<T, ToolError> {
    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tools available to a session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        if name == transfer::TRANSFER_TOOL {
            return Some(transfer::descriptor_ref());
        }
        self.tools
            .iter()
            .find(|t| t.descriptor.name == name)
            .map(|t| &t.descriptor)
    }

    /// Snapshot of the descriptors visible to one agent, filtered by its
    /// allow-list. Agents with sub-agents additionally see `transfer_task`.
    pub fn descriptors_for(&self, agent: &Agent) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .filter(|t| agent.allows_tool(&t.descriptor.name))
            .map(|t| t.descriptor.clone())
            .collect();
        if !agent.sub_agents.is_empty() {
            out.push(transfer::descriptor(&agent.sub_agents));
        }
        out
    }

    /// Execute a tool. The output is truncated to a bounded size so a noisy
    /// tool cannot blow up the conversation.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &str,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.descriptor.name == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tracing::debug!(tool = name, "invoking tool");
        let timeout = ctx.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT);

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Execution(anyhow::anyhow!("cancelled")));
            }
            result = tokio::time::timeout(timeout, tool.handler.call(arguments, ctx)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Execution(anyhow::anyhow!(
                    "tool '{}' timed out after {} seconds",
                    name,
                    timeout.as_secs()
                ))),
            },
        };

        result.map(|output| truncate_output(&output))
    }
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... output truncated: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
