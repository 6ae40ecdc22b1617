//! Filesystem tools: read, write, and targeted edit.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::tools::registry::{parse_args, ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";

/// Register the filesystem tool family. Reads never need confirmation;
/// writes and edits do.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            name: READ_FILE.into(),
            display_name: "Read file".into(),
            description: "Read a file, optionally a line range.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer", "minimum": 1},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
            requires_confirmation: false,
        },
        Arc::new(ReadFile),
    );

    registry.register(
        ToolDescriptor {
            name: WRITE_FILE.into(),
            display_name: "Write file".into(),
            description: "Create or overwrite a file with the given content.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            requires_confirmation: true,
        },
        Arc::new(WriteFile),
    );

    registry.register(
        ToolDescriptor {
            name: EDIT_FILE.into(),
            display_name: "Edit file".into(),
            description: "Replace an exact string in a file. The string must occur exactly once.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old": {"type": "string"},
                    "new": {"type": "string"}
                },
                "required": ["path", "old", "new"]
            }),
            requires_confirmation: true,
        },
        Arc::new(EditFile),
    );
}

struct ReadFile;

#[derive(Deserialize)]
struct ReadParams {
    path: String,
    start_line: Option<usize>,
    limit: Option<usize>,
}

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: ReadParams = parse_args(arguments)?;
        let path = ctx.resolve_path(&params.path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot read {}: {e}", path.display())))?;

        match (params.start_line, params.limit) {
            (None, None) => Ok(content),
            (start, limit) => {
                let start = start.unwrap_or(1).saturating_sub(1);
                let limit = limit.unwrap_or(usize::MAX);
                Ok(content
                    .lines()
                    .skip(start)
                    .take(limit)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }
}

struct WriteFile;

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: WriteParams = parse_args(arguments)?;
        let path = ctx.resolve_path(&params.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, &params.content)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot write {}: {e}", path.display())))?;
        Ok(format!("wrote {} bytes to {}", params.content.len(), path.display()))
    }
}

struct EditFile;

#[derive(Deserialize)]
struct EditParams {
    path: String,
    old: String,
    new: String,
}

#[async_trait]
impl ToolHandler for EditFile {
    async fn call(&self, arguments: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: EditParams = parse_args(arguments)?;
        let path = ctx.resolve_path(&params.path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot read {}: {e}", path.display())))?;

        let occurrences = content.matches(&params.old).count();
        if occurrences == 0 {
            return Err(ToolError::InvalidArguments(format!(
                "string not found in {}",
                path.display()
            )));
        }
        if occurrences > 1 {
            return Err(ToolError::InvalidArguments(format!(
                "string occurs {occurrences} times in {}; it must be unique",
                path.display()
            )));
        }

        let updated = content.replacen(&params.old, &params.new, 1);
        tokio::fs::write(&path, updated)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("cannot write {}: {e}", path.display())))?;
        Ok(format!("edited {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_in(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            working_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn read_write_round() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let mut registry = ToolRegistry::new();
        register(&mut registry);

        registry
            .invoke(WRITE_FILE, r#"{"path": "a.txt", "content": "one\ntwo\nthree"}"#, &ctx)
            .await
            .unwrap();

        let all = registry
            .invoke(READ_FILE, r#"{"path": "a.txt"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(all, "one\ntwo\nthree");

        let windowed = registry
            .invoke(READ_FILE, r#"{"path": "a.txt", "start_line": 2, "limit": 1}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(windowed, "two");
    }

    #[tokio::test]
    async fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let mut registry = ToolRegistry::new();
        register(&mut registry);

        registry
            .invoke(WRITE_FILE, r#"{"path": "b.txt", "content": "x x"}"#, &ctx)
            .await
            .unwrap();

        let err = registry
            .invoke(EDIT_FILE, r#"{"path": "b.txt", "old": "x", "new": "y"}"#, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        registry
            .invoke(EDIT_FILE, r#"{"path": "b.txt", "old": "x x", "new": "y"}"#, &ctx)
            .await
            .unwrap();
        let content = registry
            .invoke(READ_FILE, r#"{"path": "b.txt"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(content, "y");
    }
}
