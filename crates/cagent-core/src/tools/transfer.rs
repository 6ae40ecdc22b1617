//! The `transfer_task` pseudo-tool.
//!
//! Advertised to agents that have sub-agents, but never dispatched through a
//! handler: the agent loop intercepts it and signals the transfer controller
//! instead.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

use crate::tools::registry::ToolDescriptor;

pub const TRANSFER_TOOL: &str = "transfer_task";

#[derive(Debug, Clone, Deserialize)]
pub struct TransferArgs {
    pub agent: String,
    pub task: String,
}

static BASE_DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: TRANSFER_TOOL.to_string(),
    display_name: "Transfer task".to_string(),
    description: "Hand the given task off to a sub-agent and wait for its answer.".to_string(),
    schema: json!({
        "type": "object",
        "properties": {
            "agent": {"type": "string", "description": "Name of the sub-agent to transfer to"},
            "task": {"type": "string", "description": "The task for the sub-agent"}
        },
        "required": ["agent", "task"]
    }),
    requires_confirmation: false,
});

pub(crate) fn descriptor_ref() -> &'static ToolDescriptor {
    &BASE_DESCRIPTOR
}

/// Descriptor specialized with the agent's actual sub-agent names.
pub fn descriptor(sub_agents: &[String]) -> ToolDescriptor {
    let mut descriptor = BASE_DESCRIPTOR.clone();
    descriptor.schema["properties"]["agent"]["enum"] = json!(sub_agents);
    descriptor
}
