//! The uniform streaming completion interface.
//!
//! Every provider sits behind [`ModelAdapter`]. Differences (reasoning
//! support, batch embeddings, structured output) are reconciled with
//! capability flags instead of downcasts.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::StreamChunk;
use crate::ai::types::{Embedding, ToolDefinition};
use crate::session::Message;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not supported by this adapter")]
    Unsupported(&'static str),
}

/// What an adapter can do beyond plain streaming completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub reasoning: bool,
    pub batch_embeddings: bool,
    pub structured_output: bool,
}

/// Reasoning budget requested for a call.
///
/// `Off` disables reasoning outright. Re-enabling after an `Off` applies the
/// provider default rather than whatever was configured before: OpenAI-style
/// providers get "medium" effort, Anthropic gets 8192 budget tokens with
/// interleaved thinking, Gemini 2.5 models use dynamic budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingBudget {
    Off,
    Low,
    Medium,
    High,
    #[serde(untagged)]
    Tokens(u32),
}

impl ThinkingBudget {
    pub fn is_off(&self) -> bool {
        matches!(self, ThinkingBudget::Off)
    }

    /// Effort label for providers that take low/medium/high.
    pub fn effort(&self) -> Option<&'static str> {
        match self {
            ThinkingBudget::Low => Some("low"),
            ThinkingBudget::Medium => Some("medium"),
            ThinkingBudget::High => Some("high"),
            _ => None,
        }
    }
}

/// Provider families with distinct reasoning defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
    Other,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Self::OpenAI,
            "anthropic" => Self::Anthropic,
            "google" | "gemini" => Self::Gemini,
            _ => Self::Other,
        }
    }

    /// Default applied when reasoning is re-enabled without an explicit budget.
    pub fn default_thinking(&self) -> ResolvedThinking {
        match self {
            Self::OpenAI | Self::Other => ResolvedThinking::Effort("medium"),
            Self::Anthropic => ResolvedThinking::Tokens {
                budget: 8192,
                interleaved: true,
            },
            Self::Gemini => ResolvedThinking::Dynamic,
        }
    }
}

/// Provider-specific resolution of a [`ThinkingBudget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedThinking {
    Disabled,
    Effort(&'static str),
    Tokens { budget: u32, interleaved: bool },
    Dynamic,
}

pub fn resolve_thinking(provider: ProviderKind, requested: Option<ThinkingBudget>) -> ResolvedThinking {
    match requested {
        None => ResolvedThinking::Disabled,
        Some(ThinkingBudget::Off) => ResolvedThinking::Disabled,
        Some(ThinkingBudget::Tokens(n)) => ResolvedThinking::Tokens {
            budget: n,
            interleaved: provider == ProviderKind::Anthropic,
        },
        Some(budget) => match budget.effort() {
            Some(effort) if provider != ProviderKind::Gemini => ResolvedThinking::Effort(effort),
            _ => provider.default_thinking(),
        },
    }
}

/// Per-call options recognized by adapters.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Base URL override for gateway-style adapters.
    pub gateway_url: Option<String>,
    pub thinking_budget: Option<ThinkingBudget>,
    pub max_output_tokens: Option<u32>,
    /// Cheap, short, non-tool call used for session titles.
    pub generating_title: bool,
    /// JSON schema the response must conform to.
    pub structured_output: Option<Value>,
}

impl CallOptions {
    /// Options handed to a routing child. `max_output_tokens` is never
    /// inherited across a routing hop.
    pub fn for_routing_child(&self) -> Self {
        Self {
            max_output_tokens: None,
            ..self.clone()
        }
    }
}

/// A fully assembled model request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: CallOptions,
}

/// Uniform streaming completion interface over heterogeneous providers.
///
/// `stream` returns the receiving end of a chunk channel. Cancelling the
/// token tears the underlying connection down within a bounded grace period;
/// the channel then closes without an [`StreamChunk::End`].
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>, AdapterError>;

    async fn embed_one(&self, _text: &str) -> Result<Embedding, AdapterError> {
        Err(AdapterError::Unsupported("embeddings"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, AdapterError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }
}
