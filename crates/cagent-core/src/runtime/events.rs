//! Canonical event protocol between the runtime and its consumer.
//!
//! Every variant carries the originating agent's name. The whole taxonomy is
//! JSON-serializable so machine-readable frontends can print events verbatim.

use serde::Serialize;

use crate::ai::types::ToolCall;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Incremental assistant content.
    AgentChoice { agent: String, content: String },

    /// Incremental reasoning. Never enters the session log.
    AgentChoiceReasoning { agent: String, content: String },

    /// A tool call is waiting for a resume decision.
    ToolCallConfirmation { agent: String, tool_call: ToolCall },

    /// A tool call is about to run.
    ToolCall { agent: String, tool_call: ToolCall },

    /// A tool call finished, successfully or with a recoverable error.
    ToolCallResponse {
        agent: String,
        tool_call: ToolCall,
        response: String,
    },

    /// Adapter or transport failure; the current iteration terminated.
    Error { agent: String, message: String },

    /// The iteration budget ran out; waiting for a resume decision.
    MaxIterationsReached { agent: String, max: usize },

    /// A tool needs browser-based authorization; waiting for elicitation.
    ElicitationRequest {
        agent: String,
        server_url: String,
        server_type: String,
    },

    /// Usage for one model call.
    Usage {
        agent: String,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
        cost: f64,
    },
}

impl Event {
    pub fn agent(&self) -> &str {
        match self {
            Event::AgentChoice { agent, .. }
            | Event::AgentChoiceReasoning { agent, .. }
            | Event::ToolCallConfirmation { agent, .. }
            | Event::ToolCall { agent, .. }
            | Event::ToolCallResponse { agent, .. }
            | Event::Error { agent, .. }
            | Event::MaxIterationsReached { agent, .. }
            | Event::ElicitationRequest { agent, .. }
            | Event::Usage { agent, .. } => agent,
        }
    }
}

/// Decision fed back into a suspended runtime via `Runtime::resume` /
/// `Runtime::resume_elicitation`.
#[derive(Debug, Clone)]
pub enum ResumeDecision {
    Approve,
    ApproveForSession,
    Reject { reason: String },
    Abort,
    ElicitationAccept { payload: serde_json::Value },
    ElicitationDecline,
}
