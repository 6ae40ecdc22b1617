//! Shell execution tool.
//!
//! Runs commands through `sh -c`, either directly in the working directory
//! or inside a container when a sandbox image is configured. Cancellation
//! kills the child process.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::tools::registry::{parse_args, ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub const SHELL_TOOL: &str = "shell";

/// Sandbox settings for shell execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    /// Container image to run commands in. `None` executes on the host.
    #[serde(default)]
    pub sandbox_image: Option<String>,
    /// `host:container` bind mounts passed to the container runtime.
    #[serde(default)]
    pub binds: Vec<String>,
}

pub fn register(registry: &mut ToolRegistry, config: ShellConfig) {
    registry.register(
        ToolDescriptor {
            name: SHELL_TOOL.into(),
            display_name: "Shell".into(),
            description: "Execute a shell command and return its combined output.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command to run with sh -c"}
                },
                "required": ["command"]
            }),
            requires_confirmation: true,
        },
        Arc::new(ShellTool { config }),
    );
}

struct ShellTool {
    config: ShellConfig,
}

#[derive(Deserialize)]
struct ShellParams {
    command: String,
}

impl ShellTool {
    fn build_command(&self, command: &str, ctx: &ToolContext) -> Command {
        match &self.config.sandbox_image {
            Some(image) => {
                let mut cmd = Command::new("docker");
                cmd.arg("run").arg("--rm");
                for bind in &self.config.binds {
                    cmd.arg("-v").arg(bind);
                }
                cmd.arg(image).arg("sh").arg("-c").arg(command);
                cmd
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command).current_dir(&ctx.working_dir);
                cmd
            }
        }
    }
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: ShellParams = parse_args(arguments)?;

        let mut cmd = self.build_command(&params.command, ctx);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot spawn shell: {e}")))?;

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Execution(anyhow::anyhow!("cancelled")));
            }
            output = child.wait_with_output() => output
                .map_err(|e| ToolError::Execution(anyhow::anyhow!("shell wait failed: {e}")))?,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ToolError::Execution(anyhow::anyhow!(
                "command exited with {}:\n{}",
                output.status,
                combined
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_commands_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut registry = ToolRegistry::new();
        register(&mut registry, ShellConfig::default());

        let out = registry
            .invoke(SHELL_TOOL, r#"{"command": "echo hello"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_execution_error() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, ShellConfig::default());

        let err = registry
            .invoke(SHELL_TOOL, r#"{"command": "echo boom >&2; exit 3"}"#, &ToolContext::default())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exited"), "unexpected error: {text}");
    }

    #[test]
    fn sandbox_config_builds_container_invocation() {
        let tool = ShellTool {
            config: ShellConfig {
                sandbox_image: Some("alpine:3".into()),
                binds: vec!["/tmp:/work".into()],
            },
        };
        let cmd = tool.build_command("ls", &ToolContext::default());
        let program = cmd.as_std().get_program().to_string_lossy().to_string();
        assert_eq!(program, "docker");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"alpine:3".to_string()));
        assert!(args.contains(&"/tmp:/work".to_string()));
    }
}
