//! LSP proxy tool.
//!
//! Spawns the configured language server, performs the initialize handshake,
//! forwards a single request, and returns the raw result JSON. Good enough
//! for definition/references/hover queries; stateful workflows are not the
//! point here.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::tools::registry::{parse_args, ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub const LSP_TOOL: &str = "lsp_request";

pub fn register(registry: &mut ToolRegistry, server_command: Vec<String>) {
    registry.register(
        ToolDescriptor {
            name: LSP_TOOL.into(),
            display_name: "LSP request".into(),
            description: "Forward one request to the project's language server and return its response.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "method": {"type": "string", "description": "LSP method, e.g. textDocument/definition"},
                    "params": {"type": "object"}
                },
                "required": ["method"]
            }),
            requires_confirmation: false,
        },
        Arc::new(LspTool { server_command }),
    );
}

struct LspTool {
    server_command: Vec<String>,
}

#[derive(Deserialize)]
struct LspParams {
    method: String,
    #[serde(default)]
    params: Value,
}

#[async_trait]
impl ToolHandler for LspTool {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let request: LspParams = parse_args(arguments)?;
        let Some((program, args)) = self.server_command.split_first() else {
            return Err(ToolError::Execution(anyhow::anyhow!("no language server configured")));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot spawn {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Execution(anyhow::anyhow!("language server stdin unavailable")))?;
        let mut stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| ToolError::Execution(anyhow::anyhow!("language server stdout unavailable")))?,
        );

        let root = url::Url::from_directory_path(&ctx.working_dir)
            .map(|u| u.to_string())
            .unwrap_or_default();

        write_frame(
            &mut stdin,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"processId": null, "rootUri": root, "capabilities": {}},
            }),
        )
        .await?;
        read_response(&mut stdout, 1).await?;
        write_frame(&mut stdin, &json!({"jsonrpc": "2.0", "method": "initialized", "params": {}})).await?;

        write_frame(
            &mut stdin,
            &json!({"jsonrpc": "2.0", "id": 2, "method": request.method, "params": request.params}),
        )
        .await?;
        let response = read_response(&mut stdout, 2).await?;

        // Best-effort shutdown; the child is killed on drop regardless.
        let _ = write_frame(&mut stdin, &json!({"jsonrpc": "2.0", "id": 3, "method": "shutdown"})).await;
        let _ = write_frame(&mut stdin, &json!({"jsonrpc": "2.0", "method": "exit"})).await;

        serde_json::to_string_pretty(&response)
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("unserializable response: {e}")))
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &Value) -> Result<(), ToolError> {
    let body = payload.to_string();
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| ToolError::Execution(anyhow::anyhow!("LSP write failed: {e}")))
}

/// Read frames until the response with the expected id arrives, skipping
/// server-initiated notifications.
async fn read_response<R: AsyncBufReadExt + Unpin>(reader: &mut R, expect_id: u64) -> Result<Value, ToolError> {
    loop {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| ToolError::Execution(anyhow::anyhow!("LSP read failed: {e}")))?;
            if n == 0 {
                return Err(ToolError::Execution(anyhow::anyhow!("language server closed the stream")));
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().ok();
            }
        }

        let length = content_length
            .ok_or_else(|| ToolError::Execution(anyhow::anyhow!("missing Content-Length header")))?;
        let mut body = vec![0u8; length];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("LSP read failed: {e}")))?;

        let message: Value = serde_json::from_slice(&body)
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("malformed LSP frame: {e}")))?;

        if message["id"].as_u64() == Some(expect_id) {
            if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
                return Err(ToolError::Execution(anyhow::anyhow!(
                    "LSP error: {}",
                    error["message"].as_str().unwrap_or("unknown")
                )));
            }
            return Ok(message["result"].clone());
        }
    }
}
