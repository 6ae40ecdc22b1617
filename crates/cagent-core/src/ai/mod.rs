//! Model provider layer
//!
//! Uniform streaming completion interface over heterogeneous providers, plus
//! rule-based routing and the title-generation pass.

pub mod adapter;
pub mod gateway;
pub mod router;
pub mod streaming;
pub mod title;
pub mod types;

pub use adapter::{AdapterError, CallOptions, Capabilities, ModelAdapter, ThinkingBudget};
pub use router::{ModelCatalog, ModelConfig, ResolvedModel, RoutingRule};
pub use streaming::StreamChunk;
pub use types::{FinishReason, ToolCall, ToolDefinition, Usage};
