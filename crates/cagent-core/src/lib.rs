//! cagent core library
//!
//! Drives conversational agents through multi-turn sessions: streaming model
//! calls, tool dispatch with user confirmation, OAuth elicitation for remote
//! tools, and hand-offs between sub-agents. Frontends (CLI, servers) consume
//! the event stream produced by [`runtime::Runtime`] and feed decisions back
//! through it; they never touch the session directly while a run is active.

pub mod agent;
pub mod ai;
pub mod commands;
pub mod config;
pub mod oauth;
pub mod runtime;
pub mod session;
pub mod tools;

pub use agent::Agent;
pub use runtime::{Event, ResumeDecision, Runtime, RuntimeError};
pub use session::{Message, Session, SharedSession};
