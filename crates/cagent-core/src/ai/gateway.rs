//! OpenAI-compatible gateway adapter.
//!
//! One concrete [`ModelAdapter`] that speaks the chat-completions SSE dialect
//! most gateways expose. Provider-specific wire formats beyond this dialect
//! are out of scope; alternate providers plug in behind their own adapters.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ai::adapter::{
    resolve_thinking, AdapterError, Capabilities, ModelAdapter, ProviderKind, ResolvedThinking,
    StreamRequest,
};
use crate::ai::router::{AdapterSource, ModelConfig};
use crate::ai::streaming::StreamChunk;
use crate::ai::types::{Embedding, FinishReason, Usage};
use crate::session::{Message, Part, Role};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const STREAM_BUFFER: usize = 64;
const TITLE_MAX_TOKENS: u32 = 64;

pub struct GatewayAdapter {
    id: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    provider: ProviderKind,
    client: reqwest::Client,
}

impl GatewayAdapter {
    pub fn new(id: &str, config: &ModelConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .or(Some("OPENAI_API_KEY"))
            .and_then(|var| std::env::var(var).ok());

        Self {
            id: id.to_string(),
            model: config.model.clone(),
            base_url: config
                .gateway_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            provider: config.provider_kind(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, base_override: Option<&str>, path: &str) -> String {
        let base = base_override.unwrap_or(&self.base_url);
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    fn build_body(&self, request: &StreamRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for message in &request.messages {
            messages.push(wire_message(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }

        let max_tokens = if request.options.generating_title {
            Some(TITLE_MAX_TOKENS)
        } else {
            request.options.max_output_tokens
        };
        if let Some(max) = max_tokens {
            body["max_tokens"] = json!(max);
        }

        match resolve_thinking(self.provider, request.options.thinking_budget) {
            ResolvedThinking::Effort(effort) => body["reasoning_effort"] = json!(effort),
            ResolvedThinking::Tokens { budget, .. } => {
                body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            }
            ResolvedThinking::Disabled | ResolvedThinking::Dynamic => {}
        }

        if let Some(schema) = &request.options.structured_output {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": schema, "strict": true},
            });
        }

        body
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ModelAdapter for GatewayAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            reasoning: true,
            batch_embeddings: true,
            structured_output: true,
        }
    }

    async fn stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>, AdapterError> {
        let url = self.endpoint(request.options.gateway_url.as_deref(), "chat/completions");
        let body = self.build_body(&request);

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let model = self.model.clone();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::default();
            loop {
                let chunk = tokio::select! {
                    // Cancellation drops the response, which closes the
                    // underlying HTTP connection.
                    _ = cancel.cancelled() => {
                        debug!(%model, "gateway stream cancelled");
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                match chunk {
                    Some(Ok(data)) => {
                        for line in lines.push(&data) {
                            for part in parse_sse_line(&line) {
                                if tx.send(part).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%model, error = %e, "gateway stream read error");
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                    None => return,
                }
            }
        });

        Ok(rx)
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding, AdapterError> {
        let mut all = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        all.pop()
            .ok_or_else(|| AdapterError::InvalidResponse("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, AdapterError> {
        let url = self.endpoint(None, "embeddings");
        let response = self
            .authorize(self.client.post(&url))
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        let tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let data = payload["data"]
            .as_array()
            .ok_or_else(|| AdapterError::InvalidResponse("missing data array".into()))?;

        let per_item_tokens = if data.is_empty() { 0 } else { tokens / data.len() as u64 };
        data.iter()
            .map(|item| {
                let vector = item["embedding"]
                    .as_array()
                    .ok_or_else(|| AdapterError::InvalidResponse("missing embedding".into()))?
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect();
                Ok(Embedding {
                    vector,
                    tokens: per_item_tokens,
                    cost: 0.0,
                })
            })
            .collect()
    }
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments},
                    })
                })
                .collect();
            json!({"role": "assistant", "content": message.content, "tool_calls": calls})
        }
        _ => {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                _ => "assistant",
            };
            // Inline text parts (attachments) after the main content. Image
            // and file references are outside this dialect and are skipped.
            let mut content = message.content.clone();
            for part in &message.parts {
                if let Part::Text { text } = part {
                    if !content.is_empty() {
                        content.push_str("\n\n");
                    }
                    content.push_str(text);
                }
            }
            json!({"role": role, "content": content})
        }
    }
}

/// Splits a byte stream into complete lines, buffering partials.
#[derive(Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(data));
        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

/// Parse one SSE line into zero or more stream chunks.
fn parse_sse_line(line: &str) -> Vec<StreamChunk> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Vec::new();
    };
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }

    let event: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![StreamChunk::Error(format!("malformed SSE payload: {e}"))],
    };

    let mut chunks = Vec::new();

    if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
        chunks.push(StreamChunk::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            cached_tokens: usage["prompt_tokens_details"]["cached_tokens"]
                .as_u64()
                .unwrap_or(0),
            cost: 0.0,
        }));
    }

    let Some(choice) = event["choices"].get(0) else {
        return chunks;
    };

    let delta = &choice["delta"];
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            chunks.push(StreamChunk::ContentDelta(text.to_string()));
        }
    }
    if let Some(text) = delta["reasoning_content"].as_str() {
        if !text.is_empty() {
            chunks.push(StreamChunk::ReasoningDelta(text.to_string()));
        }
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            let id = call["id"].as_str().unwrap_or_default().to_string();
            let name = call["function"]["name"].as_str().map(str::to_string);
            let fragment = call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            chunks.push(StreamChunk::ToolCallDelta {
                id,
                name,
                arguments_fragment: fragment,
            });
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        let finish = match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        };
        chunks.push(StreamChunk::End(finish));
    }

    chunks
}

/// Default adapter source: every config becomes a [`GatewayAdapter`].
pub struct GatewaySource;

impl AdapterSource for GatewaySource {
    fn adapter(
        &self,
        key: &str,
        config: &ModelConfig,
    ) -> Result<std::sync::Arc<dyn ModelAdapter>, AdapterError> {
        Ok(std::sync::Arc::new(GatewayAdapter::new(key, config)))
    }
}
