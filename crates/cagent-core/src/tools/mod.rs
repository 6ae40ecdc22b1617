//! Tool registry and built-in tool implementations.

pub mod fs;
pub mod lsp;
pub mod mcp;
pub mod rag;
pub mod registry;
pub mod shell;
pub mod transfer;

pub use registry::{
    parse_args, ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry,
};
pub use transfer::{TransferArgs, TRANSFER_TOOL};
