//! Session state: the ordered message log plus usage counters.
//!
//! A session is created by the embedder, mutated exclusively by the active
//! agent loop, and observed by everyone else through [`Session::snapshot`] or
//! the event stream. The message list is append-only, with one exception:
//! the assistant message currently being streamed grows in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ai::types::{ToolCall, Usage};

/// A session shared between the runtime (writer) and observers (readers).
pub type SharedSession = Arc<RwLock<Session>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A non-text attachment or inline block within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ImageRef { path: String, media_type: String },
    FileRef { path: String, media_type: String },
}

/// One entry in the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `role == Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Non-zero exit for tool messages carrying an error result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Name of the agent that produced this message.
    pub agent: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(agent: &str, content: impl Into<String>) -> Self {
        Self::new(Role::User, agent, content)
    }

    pub fn assistant(agent: &str, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, agent, content)
    }

    pub fn tool_result(agent: &str, call_id: &str, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            is_error,
            ..Self::new(Role::Tool, agent, content)
        }
    }

    fn new(role: Role, agent: &str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            agent: agent.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = parts;
        self
    }
}

/// Usage summed across every model call in the session.
pub type UsageTotals = Usage;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub title: String,
    /// Sticky session-wide tool approval.
    pub tools_approved: bool,
    messages: Vec<Message>,
    usage: UsageTotals,
    /// Names of the agents currently active, root first.
    agent_stack: Vec<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: String::new(),
            tools_approved: false,
            messages: Vec::new(),
            usage: UsageTotals::default(),
            agent_stack: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Cheap copy of the current message log for external observers.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn usage(&self) -> UsageTotals {
        self.usage
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.add(usage);
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Grow the in-flight assistant message. Only valid while the last
    /// message is the one being streamed.
    pub fn append_to_last(&mut self, delta: &str) {
        if let Some(last) = self.messages.last_mut() {
            last.content.push_str(delta);
        }
    }

    /// Attach the finalized tool-call list to the streamed assistant message.
    pub fn finalize_last(&mut self, tool_calls: Vec<ToolCall>) {
        if let Some(last) = self.messages.last_mut() {
            last.tool_calls = tool_calls;
        }
    }

    /// Drop the in-flight assistant message if nothing arrived for it.
    pub fn discard_empty_last(&mut self) {
        if let Some(last) = self.messages.last() {
            if last.role == Role::Assistant && last.content.is_empty() && last.tool_calls.is_empty() {
                self.messages.pop();
            }
        }
    }

    /// Text of the most recent user message, used as the routing query.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// True when a tool-call id already appears anywhere in the log.
    pub fn has_tool_call_id(&self, id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.tool_calls.iter().any(|c| c.id == id))
    }

    pub fn agent_stack(&self) -> &[String] {
        &self.agent_stack
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.agent_stack.last().map(String::as_str)
    }

    pub fn push_agent(&mut self, name: &str) {
        self.agent_stack.push(name.to_string());
    }

    pub fn pop_agent(&mut self) {
        self.agent_stack.pop();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_message_grows_in_place() {
        let mut session = Session::new();
        session.push(Message::assistant("root", ""));
        session.append_to_last("hel");
        session.append_to_last("lo");
        assert_eq!(session.messages()[0].content, "hello");
    }

    #[test]
    fn empty_streamed_message_is_discarded() {
        let mut session = Session::new();
        session.push(Message::user("root", "hi"));
        session.push(Message::assistant("root", ""));
        session.discard_empty_last();
        assert_eq!(session.messages().len(), 1);

        session.push(Message::assistant("root", ""));
        session.append_to_last("kept");
        session.discard_empty_last();
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn snapshot_is_prefix_stable() {
        let mut session = Session::new();
        session.push(Message::user("root", "one"));
        let early = session.snapshot();
        session.push(Message::assistant("root", "two"));
        let late = session.snapshot();
        assert_eq!(early.len(), 1);
        assert_eq!(late[0].content, early[0].content);
    }

    #[test]
    fn duplicate_tool_call_ids_are_detectable() {
        let mut session = Session::new();
        let mut msg = Message::assistant("root", "");
        msg.tool_calls = vec![ToolCall::new("call_1", "read_file", "{}")];
        session.push(msg);
        assert!(session.has_tool_call_id("call_1"));
        assert!(!session.has_tool_call_id("call_2"));
    }
}
