//! HTTP MCP toolset.
//!
//! Talks JSON-RPC to a streamable-HTTP MCP server, exposing every remote
//! tool under `mcp__{server}_{tool}`. A 401/403 from the server surfaces as
//! [`ToolError::OAuthRequired`] so the runtime can run the elicitation flow
//! and retry with a bearer token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::oauth::TokenStore;
use crate::tools::registry::{ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub const SERVER_TYPE_MCP: &str = "mcp";

pub struct McpToolset {
    server_name: String,
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<TokenStore>,
    next_id: AtomicU64,
    initialized: Mutex<bool>,
}

impl McpToolset {
    pub fn new(server_name: impl Into<String>, base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Arc<Self> {
        Arc::new(Self {
            server_name: server_name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            tokens,
            next_id: AtomicU64::new(1),
            initialized: Mutex::new(false),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.base_url
    }

    /// List the server's tools and register them. Tools from remote servers
    /// always require confirmation.
    pub async fn discover(self: &Arc<Self>, registry: &mut ToolRegistry) -> Result<usize, ToolError> {
        let result = self.rpc("tools/list", json!({})).await?;
        let tools = result["tools"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let count = tools.len();
        for tool in tools {
            let Some(remote_name) = tool["name"].as_str().map(str::to_string) else {
                continue;
            };
            let descriptor = ToolDescriptor {
                name: format!("mcp__{}_{}", self.server_name, remote_name),
                display_name: remote_name.clone(),
                description: tool["description"].as_str().unwrap_or("MCP tool").to_string(),
                schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
                requires_confirmation: true,
            };
            registry.register(
                descriptor,
                Arc::new(McpTool {
                    toolset: self.clone(),
                    remote_name,
                }),
            );
        }
        Ok(count)
    }

    async fn ensure_initialized(&self) -> Result<(), ToolError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        self.rpc_raw(
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "clientInfo": {"name": "cagent", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {},
            }),
        )
        .await?;
        *initialized = true;
        Ok(())
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        if method != "initialize" {
            self.ensure_initialized().await?;
        }
        self.rpc_raw(method, params).await
    }

    async fn rpc_raw(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self
            .client
            .post(&self.base_url)
            .header("accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(token) = self.tokens.get(&self.base_url) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("MCP transport error: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ToolError::OAuthRequired {
                server_url: self.base_url.clone(),
                server_type: SERVER_TYPE_MCP.to_string(),
                source: anyhow::anyhow!("MCP server returned {status}"),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Execution(anyhow::anyhow!(
                "MCP server returned {status}: {text}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("invalid MCP response: {e}")))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(ToolError::Execution(anyhow::anyhow!(
                "MCP error {}: {}",
                error["code"],
                error["message"].as_str().unwrap_or("unknown")
            )));
        }

        Ok(payload["result"].clone())
    }
}

struct McpTool {
    toolset: Arc<McpToolset>,
    remote_name: String,
}

#[async_trait]
impl ToolHandler for McpTool {
    async fn call(&self, arguments: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        let arguments: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };

        let result = self
            .toolset
            .rpc("tools/call", json!({"name": self.remote_name, "arguments": arguments}))
            .await?;

        if result["isError"].as_bool().unwrap_or(false) {
            return Err(ToolError::Execution(anyhow::anyhow!(
                "{}",
                flatten_content(&result)
            )));
        }

        Ok(flatten_content(&result))
    }
}

/// Concatenate the text blocks of an MCP tool result.
fn flatten_content(result: &Value) -> String {
    let Some(blocks) = result["content"].as_array() else {
        return result.to_string();
    };
    let mut out = String::new();
    for block in blocks {
        if let Some(text) = block["text"].as_str() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}
