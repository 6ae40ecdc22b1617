//! Tool-call confirmation gate.
//!
//! Decides whether a pending tool call runs, consulting (in order) the
//! descriptor, the session's sticky approval, the per-tool decision cache,
//! and finally the user via a `ToolCallConfirmation` event plus a parked
//! receive on the run's decision channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ai::types::ToolCall;
use crate::session::SharedSession;
use crate::tools::registry::ToolDescriptor;

use super::bus::EventBus;
use super::events::{Event, ResumeDecision};
use super::gate::ResumeGate;

/// Outcome of the gate for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Run,
    Skip(String),
    /// The user aborted the run; the context has been cancelled.
    Aborted,
}

pub struct ConfirmationGate {
    gate: Arc<ResumeGate>,
    /// Pre-trusted (or pre-denied) tools for this session. Populated only
    /// through [`ConfirmationGate::remember`], never by interactive answers.
    remembered: Mutex<HashMap<String, bool>>,
}

impl ConfirmationGate {
    pub fn new(gate: Arc<ResumeGate>) -> Self {
        Self {
            gate,
            remembered: Mutex::new(HashMap::new()),
        }
    }

    /// Cache a decision for a tool name ahead of time.
    pub fn remember(&self, tool: &str, approved: bool) {
        self.remembered.lock().insert(tool.to_string(), approved);
    }

    pub async fn decide(
        &self,
        descriptor: &ToolDescriptor,
        call: &ToolCall,
        agent: &str,
        session: &SharedSession,
        bus: &EventBus,
        cancel: &CancellationToken,
    ) -> Verdict {
        if !descriptor.requires_confirmation {
            return Verdict::Run;
        }
        if session.read().tools_approved {
            return Verdict::Run;
        }
        if let Some(approved) = self.remembered.lock().get(&call.name).copied() {
            return if approved {
                Verdict::Run
            } else {
                Verdict::Skip("tool denied for this session".to_string())
            };
        }

        bus.publish(Event::ToolCallConfirmation {
            agent: agent.to_string(),
            tool_call: call.clone(),
        })
        .await;

        match self.gate.wait(cancel).await {
            Some(ResumeDecision::Approve) => Verdict::Run,
            Some(ResumeDecision::ApproveForSession) => {
                session.write().tools_approved = true;
                Verdict::Run
            }
            Some(ResumeDecision::Reject { reason }) => Verdict::Skip(reason),
            Some(ResumeDecision::Abort) => {
                cancel.cancel();
                Verdict::Aborted
            }
            Some(other) => {
                tracing::warn!(?other, "unexpected decision at confirmation gate");
                Verdict::Skip("unexpected decision".to_string())
            }
            None => Verdict::Aborted,
        }
    }
}
