//! Streaming chunk protocol
//!
//! A model call yields a lazy, finite, non-restartable sequence of
//! [`StreamChunk`]s over an mpsc channel. Adapters guarantee that tool-call
//! fragments for the same id arrive in concatenation order; the consumer
//! rebuilds the argument JSON by appending.

use crate::ai::types::{FinishReason, Usage};

/// One element of a model response stream.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Incremental assistant text.
    ContentDelta(String),

    /// Incremental reasoning text. Never enters the session message log.
    ReasoningDelta(String),

    /// A fragment of a streamed tool call. `name` is present on the first
    /// fragment for an id and absent on continuations.
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments_fragment: String,
    },

    /// Usage accounting for this call.
    Usage(Usage),

    /// Terminal marker. A stream that ends without one while holding partial
    /// tool-call JSON is treated as a transport error by the consumer.
    End(FinishReason),

    /// Transport or protocol failure. The stream ends after this.
    Error(String),
}
