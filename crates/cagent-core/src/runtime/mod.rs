//! The agent runtime.
//!
//! ```text
//!  ┌──────────┐         Event          ┌──────────┐
//!  │ Runtime   │ ────────────────────►  │ Consumer │
//!  │ (core)    │                        │ (CLI, …) │
//!  │           │ ◄────────────────────  │          │
//!  └──────────┘     ResumeDecision      └──────────┘
//! ```
//!
//! One spawned task per run; within it, one loop per active agent frame.
//! Only the loop writes to its session; suspension points (event send,
//! decision receive, OAuth callback, model chunks, tool completion) all
//! honor the run's cancellation token.

pub mod agent_loop;
pub mod bus;
pub mod confirmation;
pub mod events;
pub mod facade;
pub mod gate;
pub mod stream;
pub mod transfer;

use thiserror::Error;

pub use bus::EventBus;
pub use events::{Event, ResumeDecision};
pub use facade::{Runtime, RuntimeBuilder};
pub use gate::ResumeGate;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("nothing is waiting for a decision")]
    NothingWaiting,

    #[error("a run is already active for this runtime")]
    RunActive,

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid decision: {0}")]
    InvalidDecision(&'static str),

    #[error("no agents configured")]
    NoAgents,

    #[error("no model catalog configured")]
    NoCatalog,
}
