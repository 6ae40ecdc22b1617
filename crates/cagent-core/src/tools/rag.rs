//! RAG query tool.
//!
//! Indexing internals are out of scope: the tool holds caller-provided
//! documents, embeds them through the model adapter on first use, and ranks
//! by cosine similarity.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::ai::adapter::ModelAdapter;
use crate::tools::registry::{parse_args, ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub const RAG_TOOL: &str = "search_knowledge";

const DEFAULT_TOP_K: usize = 4;

pub fn register(registry: &mut ToolRegistry, adapter: Arc<dyn ModelAdapter>, documents: Vec<String>) {
    registry.register(
        ToolDescriptor {
            name: RAG_TOOL.into(),
            display_name: "Search knowledge".into(),
            description: "Search the session's knowledge base and return the most relevant passages.".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "top_k": {"type": "integer", "minimum": 1}
                },
                "required": ["query"]
            }),
            requires_confirmation: false,
        },
        Arc::new(RagTool {
            adapter,
            documents,
            index: OnceCell::new(),
        }),
    );
}

struct RagTool {
    adapter: Arc<dyn ModelAdapter>,
    documents: Vec<String>,
    index: OnceCell<Vec<Vec<f32>>>,
}

#[derive(Deserialize)]
struct RagParams {
    query: String,
    top_k: Option<usize>,
}

#[async_trait]
impl ToolHandler for RagTool {
    async fn call(&self, arguments: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        let params: RagParams = parse_args(arguments)?;
        if self.documents.is_empty() {
            return Ok("knowledge base is empty".to_string());
        }

        let index = self
            .index
            .get_or_try_init(|| async {
                let embeddings = self.adapter.embed_batch(&self.documents).await?;
                Ok::<_, crate::ai::adapter::AdapterError>(
                    embeddings.into_iter().map(|e| e.vector).collect(),
                )
            })
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("embedding failed: {e}")))?;

        let query = self
            .adapter
            .embed_one(&params.query)
            .await
            .map_err(|e| ToolError::Execution(anyhow::anyhow!("embedding failed: {e}")))?;

        let mut scored: Vec<(usize, f32)> = index
            .iter()
            .enumerate()
            .map(|(i, vector)| (i, cosine(&query.vector, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k = params.top_k.unwrap_or(DEFAULT_TOP_K);
        let mut out = String::new();
        for (doc, score) in scored.into_iter().take(top_k) {
            if !out.is_empty() {
                out.push_str("\n\n---\n\n");
            }
            out.push_str(&format!("[score {score:.3}] {}", self.documents[doc]));
        }
        Ok(out)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
